//! Profile field merging
//!
//! Pure functions combining the primary and secondary profile during the
//! attributes step of a merge. The primary always wins where it has a value.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::member::{Reach, REACH_TOTAL};
use super::{Member, Organization};

/// Source key holding the displayed value of an attribute
pub const DEFAULT_SOURCE: &str = "default";

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Merge `attribute -> source -> value` maps.
///
/// The primary's `default` is kept unless missing or empty, in which case the
/// secondary's is adopted. Sources the primary lacks are copied over.
pub fn merge_attributes(primary: &Value, secondary: &Value) -> Value {
    let mut merged: Map<String, Value> = primary.as_object().cloned().unwrap_or_default();

    let Some(secondary) = secondary.as_object() else {
        return Value::Object(merged);
    };

    for (name, secondary_sources) in secondary {
        let entry = merged
            .entry(name.clone())
            .or_insert_with(|| Value::Object(Map::new()));

        match secondary_sources.as_object() {
            Some(secondary_sources) if entry.is_object() => {
                if let Some(primary_sources) = entry.as_object_mut() {
                    for (source, value) in secondary_sources {
                        let take = match primary_sources.get(source) {
                            None => true,
                            Some(existing) => source == DEFAULT_SOURCE && is_empty_value(existing),
                        };
                        if take && !is_empty_value(value) {
                            primary_sources.insert(source.clone(), value.clone());
                        }
                    }
                }
            }
            // Not a source map on one side: only fill a blank primary value
            _ => {
                if is_empty_value(entry) {
                    *entry = secondary_sources.clone();
                }
            }
        }
    }

    Value::Object(merged)
}

/// Per-platform maximum, total recomputed from the platforms
pub fn merge_reach(primary: &Reach, secondary: &Reach) -> Reach {
    let mut merged = Reach::new();
    for (platform, count) in primary.iter().chain(secondary.iter()) {
        if platform == REACH_TOTAL {
            continue;
        }
        let slot = merged.entry(platform.clone()).or_insert(*count);
        *slot = (*slot).max(*count);
    }

    let total = if merged.is_empty() {
        let p = primary.get(REACH_TOTAL).copied();
        let s = secondary.get(REACH_TOTAL).copied();
        p.max(s)
    } else {
        Some(merged.values().filter(|c| **c > 0).sum())
    };
    if let Some(total) = total {
        merged.insert(REACH_TOTAL.to_string(), total);
    }
    merged
}

/// Earlier of two optional dates
pub fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Ordered union: primary order first, then new secondary entries
pub fn union_strings(primary: &[String], secondary: &[String]) -> Vec<String> {
    let mut merged = primary.to_vec();
    for item in secondary {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

fn sum_estimates(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, b) => a.or(b),
    }
}

/// Primary member profile after absorbing the secondary
pub fn merge_member_profile(primary: &Member, secondary: &Member) -> Member {
    let mut merged = primary.clone();
    merged.attributes = merge_attributes(&primary.attributes, &secondary.attributes);
    merged.joined_at = earliest(primary.joined_at, secondary.joined_at);
    merged.reach = merge_reach(&primary.reach, &secondary.reach);
    if merged.contributions.is_none() {
        merged.contributions = secondary.contributions.clone();
    }
    merged.manually_changed_fields =
        union_strings(&primary.manually_changed_fields, &secondary.manually_changed_fields);
    merged.manually_created = primary.manually_created || secondary.manually_created;
    if merged.display_name.trim().is_empty() {
        merged.display_name = secondary.display_name.clone();
    }
    merged
}

/// Primary organization profile after absorbing the secondary
pub fn merge_organization_profile(primary: &Organization, secondary: &Organization) -> Organization {
    let mut merged = primary.clone();
    merged.attributes = merge_attributes(&primary.attributes, &secondary.attributes);
    merged.manually_created = primary.manually_created || secondary.manually_created;
    merged.member_count_estimate =
        sum_estimates(primary.member_count_estimate, secondary.member_count_estimate);
    merged.activity_count_estimate =
        sum_estimates(primary.activity_count_estimate, secondary.activity_count_estimate);
    if merged.display_name.trim().is_empty() {
        merged.display_name = secondary.display_name.clone();
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_primary_default_wins() {
        let primary = json!({"location": {"default": "Berlin", "github": "Berlin"}});
        let secondary = json!({"location": {"default": "Paris", "linkedin": "Paris, FR"}});

        let merged = merge_attributes(&primary, &secondary);
        assert_eq!(merged["location"]["default"], "Berlin");
        assert_eq!(merged["location"]["github"], "Berlin");
        assert_eq!(merged["location"]["linkedin"], "Paris, FR");
    }

    #[test]
    fn test_empty_primary_default_is_replaced() {
        let primary = json!({"bio": {"default": ""}});
        let secondary = json!({"bio": {"default": "Rustacean"}, "url": {"default": "x.dev"}});

        let merged = merge_attributes(&primary, &secondary);
        assert_eq!(merged["bio"]["default"], "Rustacean");
        assert_eq!(merged["url"]["default"], "x.dev");
    }

    #[test]
    fn test_reach_takes_max_and_recomputes_total() {
        let primary: Reach = [("github".to_string(), 10), ("total".to_string(), 10)].into();
        let secondary: Reach = [
            ("github".to_string(), 4),
            ("twitter".to_string(), 30),
            ("total".to_string(), 34),
        ]
        .into();

        let merged = merge_reach(&primary, &secondary);
        assert_eq!(merged["github"], 10);
        assert_eq!(merged["twitter"], 30);
        assert_eq!(merged["total"], 40);
    }

    #[test]
    fn test_member_profile_merge() {
        let mut primary = Member::new("Ann");
        primary.joined_at = Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap());
        primary.manually_changed_fields = vec!["attributes.bio".to_string()];

        let mut secondary = Member::new("ann-gh");
        secondary.joined_at = Some(Utc.with_ymd_and_hms(2019, 5, 1, 0, 0, 0).unwrap());
        secondary.manually_changed_fields =
            vec!["attributes.bio".to_string(), "displayName".to_string()];
        secondary.contributions = Some(json!([{"repo": "crowd"}]));

        let merged = merge_member_profile(&primary, &secondary);
        assert_eq!(merged.id, primary.id);
        assert_eq!(merged.display_name, "Ann");
        assert_eq!(merged.joined_at, secondary.joined_at);
        assert_eq!(merged.manually_changed_fields.len(), 2);
        assert_eq!(merged.contributions, secondary.contributions);
    }
}
