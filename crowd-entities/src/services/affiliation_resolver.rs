//! Affiliation resolution
//!
//! Answers "which organization was this member affiliated with in this segment at
//! this moment". The cascade, first match wins:
//!
//! 1. Manual segment override whose interval contains the timestamp. An override
//!    without an organization pins the member as unaffiliated.
//! 2. Work experience whose `[date_start, date_end]` contains the timestamp.
//! 3. Unknown-dated work experience created at or before the timestamp (latest
//!    `created_at` wins).
//! 4. Any unknown-dated work experience.
//! 5. Nothing.
//!
//! Several candidates at one level go through the tie-break: primary flag, then a
//! strictly larger member count estimate, then the longest interval. Remaining ties
//! fall back to a fixed order (start desc, created_at, id) so the answer is stable.
//!
//! [`cascade`] and [`tie_break`] are pure; [`AffiliationResolver`] adds loading
//! and member count estimates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowd_common::config::{AffiliationConfig, RetryPolicy};
use crowd_common::{Error, Result};
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::{activities, affiliations, members, organizations};
use crate::models::{AffiliationRecords, MemberOrganization, SegmentAffiliation, SegmentAffiliationInput};
use crate::utils::{begin_monitored, retry_transient};

/// Source of organization size estimates for the tie-break
#[async_trait]
pub trait OrganizationSizeEstimator: Send + Sync {
    /// Estimated member count, `None` when unknown
    async fn estimate_member_count(&self, organization_id: &str) -> Result<Option<i64>>;
}

/// Reads `organizations.member_count_estimate`
pub struct StoredSizeEstimator {
    pool: SqlitePool,
}

impl StoredSizeEstimator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationSizeEstimator for StoredSizeEstimator {
    async fn estimate_member_count(&self, organization_id: &str) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        organizations::member_count_estimate(&mut conn, organization_id).await
    }
}

/// Cascade result before member counts are known
#[derive(Debug, PartialEq)]
pub enum CascadeOutcome<'a> {
    /// Final answer (`None`: pinned unaffiliated or nothing matched)
    Resolved(Option<String>),
    /// Several organizations qualify; candidates in deterministic order
    TieBreak(Vec<&'a MemberOrganization>),
}

/// start desc (unknown last), created_at asc, id asc
fn deterministic_order(a: &MemberOrganization, b: &MemberOrganization) -> Ordering {
    let start = match (a.date_start, b.date_start) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    start
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn has_ignored_title(role: &MemberOrganization, ignored_titles: &[String]) -> bool {
    let Some(title) = role.title.as_deref() else {
        return false;
    };
    let title = title.to_lowercase();
    ignored_titles
        .iter()
        .any(|ignored| !ignored.is_empty() && title.contains(&ignored.to_lowercase()))
}

/// Roles that may produce an affiliation at all
pub fn eligible_roles<'a>(
    roles: &'a [MemberOrganization],
    ignored_titles: &[String],
) -> Vec<&'a MemberOrganization> {
    roles
        .iter()
        .filter(|r| r.allow_affiliation)
        .filter(|r| !r.is_end_only())
        .filter(|r| !has_ignored_title(r, ignored_titles))
        .collect()
}

/// Override that applies to (segment, ts): most recent start, then lowest id
pub fn matching_override<'a>(
    overrides: &'a [SegmentAffiliation],
    segment_id: &str,
    ts: DateTime<Utc>,
) -> Option<&'a SegmentAffiliation> {
    overrides
        .iter()
        .filter(|o| o.segment_id == segment_id && o.contains(ts))
        .min_by(|a, b| {
            // "min" of (start desc, id asc); unknown start sorts last
            let start = match (a.date_start, b.date_start) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            start.then_with(|| a.id.cmp(&b.id))
        })
}

fn candidates(mut roles: Vec<&MemberOrganization>) -> CascadeOutcome<'_> {
    roles.sort_by(|a, b| deterministic_order(a, b));
    let Some(first) = roles.first() else {
        return CascadeOutcome::Resolved(None);
    };
    if roles.iter().all(|r| r.organization_id == first.organization_id) {
        return CascadeOutcome::Resolved(Some(first.organization_id.clone()));
    }
    CascadeOutcome::TieBreak(roles)
}

/// Run the cascade over one member's records
pub fn cascade<'a>(
    records: &'a AffiliationRecords,
    segment_id: &str,
    ts: DateTime<Utc>,
    ignored_titles: &[String],
) -> CascadeOutcome<'a> {
    // 1. Manual override
    if let Some(ov) = matching_override(&records.overrides, segment_id, ts) {
        return CascadeOutcome::Resolved(ov.organization_id.clone());
    }

    let roles = eligible_roles(&records.roles, ignored_titles);

    // 2. Dated work experience containing ts
    let containing: Vec<_> = roles.iter().copied().filter(|r| r.contains(ts)).collect();
    if !containing.is_empty() {
        return candidates(containing);
    }

    let unknown: Vec<_> = roles.iter().copied().filter(|r| r.is_unknown_dated()).collect();

    // 3. Unknown-dated, already known at ts; latest created_at only
    let latest_known = unknown
        .iter()
        .filter(|r| r.created_at <= ts)
        .map(|r| r.created_at)
        .max();
    if let Some(latest) = latest_known {
        let tied: Vec<_> = unknown.iter().copied().filter(|r| r.created_at == latest).collect();
        return candidates(tied);
    }

    // 4. Any unknown-dated
    if !unknown.is_empty() {
        return candidates(unknown);
    }

    // 5. Nothing
    CascadeOutcome::Resolved(None)
}

/// Ranks an interval for the last tie-break stage: open-ended beats bounded
/// (earlier start first), bounded compares by length, unknown ranks lowest.
fn interval_rank(role: &MemberOrganization) -> (u8, i64) {
    match (role.date_start, role.date_end) {
        (Some(start), None) => (2, -start.timestamp_millis()),
        (Some(start), Some(end)) => (1, (end - start).num_milliseconds()),
        _ => (0, 0),
    }
}

/// Choose one organization among candidates (given in deterministic order).
///
/// `estimates` maps organization id to its member count estimate; a missing or
/// `None` entry for any candidate skips the size stage.
pub fn tie_break(
    candidates: &[&MemberOrganization],
    estimates: &HashMap<String, Option<i64>>,
) -> Option<String> {
    // (a) primary flag, first in order
    if let Some(primary) = candidates.iter().find(|r| r.is_primary_organization) {
        return Some(primary.organization_id.clone());
    }

    // (b) strictly larger organization
    let sizes: Option<Vec<(&str, i64)>> = candidates
        .iter()
        .map(|r| {
            estimates
                .get(&r.organization_id)
                .copied()
                .flatten()
                .map(|n| (r.organization_id.as_str(), n))
        })
        .collect();
    if let Some(sizes) = sizes {
        if let Some(max) = sizes.iter().map(|(_, n)| *n).max() {
            let mut largest: Vec<&str> = sizes.iter().filter(|(_, n)| *n == max).map(|(o, _)| *o).collect();
            largest.dedup();
            if largest.len() == 1 {
                return Some(largest[0].to_string());
            }
        }
    }

    // (c) longest interval; first in order among equals
    let mut best: Option<&MemberOrganization> = None;
    for role in candidates {
        match best {
            Some(current) if interval_rank(role) <= interval_rank(current) => {}
            _ => best = Some(role),
        }
    }
    best.map(|r| r.organization_id.clone())
}

/// Resolve without any I/O; estimates must already be known
pub fn resolve_with_estimates(
    records: &AffiliationRecords,
    segment_id: &str,
    ts: DateTime<Utc>,
    ignored_titles: &[String],
    estimates: &HashMap<String, Option<i64>>,
) -> Option<String> {
    match cascade(records, segment_id, ts, ignored_titles) {
        CascadeOutcome::Resolved(org) => org,
        CascadeOutcome::TieBreak(candidates) => tie_break(&candidates, estimates),
    }
}

/// Affiliation resolver backed by the database
#[derive(Clone)]
pub struct AffiliationResolver {
    pool: SqlitePool,
    estimator: Arc<dyn OrganizationSizeEstimator>,
    config: AffiliationConfig,
    retry: RetryPolicy,
}

impl AffiliationResolver {
    pub fn new(pool: SqlitePool, config: AffiliationConfig, retry: RetryPolicy) -> Self {
        let estimator = Arc::new(StoredSizeEstimator::new(pool.clone()));
        Self::with_estimator(pool, config, retry, estimator)
    }

    pub fn with_estimator(
        pool: SqlitePool,
        config: AffiliationConfig,
        retry: RetryPolicy,
        estimator: Arc<dyn OrganizationSizeEstimator>,
    ) -> Self {
        Self {
            pool,
            estimator,
            config,
            retry,
        }
    }

    pub fn ignored_titles(&self) -> &[String] {
        &self.config.ignored_titles
    }

    /// Organization the member is affiliated with; `timestamp` defaults to now
    pub async fn resolve_affiliation(
        &self,
        member_id: &str,
        segment_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Option<String>> {
        let ts = timestamp.unwrap_or_else(crowd_common::time::now);
        let records = {
            let mut conn = self.pool.acquire().await?;
            affiliations::load_records(&mut conn, member_id).await?
        };

        let mut estimates = HashMap::new();
        let org = self.resolve_with_records(&records, segment_id, ts, &mut estimates).await;
        debug!(member_id, segment_id, ts = %ts, organization_id = ?org, "Affiliation resolved");
        Ok(org)
    }

    /// Resolve over preloaded records; `estimates` memoizes estimator calls
    pub async fn resolve_with_records(
        &self,
        records: &AffiliationRecords,
        segment_id: &str,
        ts: DateTime<Utc>,
        estimates: &mut HashMap<String, Option<i64>>,
    ) -> Option<String> {
        match cascade(records, segment_id, ts, &self.config.ignored_titles) {
            CascadeOutcome::Resolved(org) => org,
            CascadeOutcome::TieBreak(candidates) => {
                for role in &candidates {
                    if estimates.contains_key(&role.organization_id) {
                        continue;
                    }
                    let estimate = match self.estimator.estimate_member_count(&role.organization_id).await {
                        Ok(estimate) => estimate,
                        Err(e) => {
                            warn!(
                                organization_id = %role.organization_id,
                                error = %e,
                                "Member count estimate unavailable"
                            );
                            None
                        }
                    };
                    estimates.insert(role.organization_id.clone(), estimate);
                }
                tie_break(&candidates, estimates)
            }
        }
    }

    /// Recompute `organization_id` of every activity of a member.
    ///
    /// Returns how many activities changed.
    pub async fn restamp_member_activities(&self, member_id: &str) -> Result<u64> {
        let batch_size = self.config.restamp_batch_size.max(1);
        let records = {
            let mut conn = self.pool.acquire().await?;
            affiliations::load_records(&mut conn, member_id).await?
        };

        let mut estimates = HashMap::new();
        let mut after: Option<String> = None;
        let mut updated = 0u64;

        loop {
            let page = {
                let mut conn = self.pool.acquire().await?;
                activities::member_stamps_page(&mut conn, member_id, after.as_deref(), batch_size).await?
            };
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id.clone());

            let mut changes: Vec<(String, Option<String>)> = Vec::new();
            for stamp in &page {
                let org = self
                    .resolve_with_records(&records, &stamp.segment_id, stamp.timestamp, &mut estimates)
                    .await;
                if org != stamp.organization_id {
                    changes.push((stamp.id.clone(), org));
                }
            }

            if !changes.is_empty() {
                let pool = &self.pool;
                let changes = &changes;
                retry_transient("restamp activities", &self.retry, || async move {
                    let mut tx = begin_monitored(pool, "affiliation::restamp").await?;
                    for (activity_id, org) in changes {
                        activities::set_activity_organization(tx.conn(), activity_id, org.as_deref()).await?;
                    }
                    tx.commit().await
                })
                .await?;
                updated += changes.len() as u64;
            }

            if page.len() < batch_size {
                break;
            }
        }

        info!(member_id, updated, "Restamped member activities");
        Ok(updated)
    }

    /// Replace all manual overrides of a member, then restamp its activities.
    ///
    /// Returns how many activities changed affiliation.
    pub async fn replace_member_affiliations(
        &self,
        member_id: &str,
        overrides: Vec<SegmentAffiliationInput>,
    ) -> Result<u64> {
        for input in &overrides {
            if input.segment_id.trim().is_empty() {
                return Err(Error::InvalidInput("segmentId must not be empty".to_string()));
            }
            if let (Some(start), Some(end)) = (input.date_start, input.date_end) {
                if start > end {
                    return Err(Error::InvalidInput(format!(
                        "Override for segment {} starts after it ends",
                        input.segment_id
                    )));
                }
            }
        }

        let mut tx = begin_monitored(&self.pool, "affiliation::replace_overrides").await?;
        if members::load_member(tx.conn(), member_id).await?.is_none() {
            return Err(Error::NotFound(format!("Member not found: {}", member_id)));
        }
        for org_id in overrides.iter().filter_map(|o| o.organization_id.as_deref()) {
            if organizations::load_organization(tx.conn(), org_id).await?.is_none() {
                return Err(Error::InvalidInput(format!("Unknown organization: {}", org_id)));
            }
        }

        let rows: Vec<SegmentAffiliation> =
            overrides.into_iter().map(|o| o.into_affiliation(member_id)).collect();
        affiliations::replace_member_overrides(tx.conn(), member_id, &rows).await?;
        tx.commit().await?;

        info!(member_id, overrides = rows.len(), "Replaced manual affiliations");
        self.restamp_member_activities(member_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn role(org: &str, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> MemberOrganization {
        MemberOrganization::new("m", org).with_dates(start, end)
    }

    fn ignored() -> Vec<String> {
        AffiliationConfig::default().ignored_titles
    }

    fn resolve(records: &AffiliationRecords, ts: DateTime<Utc>) -> Option<String> {
        resolve_with_estimates(records, "seg", ts, &ignored(), &HashMap::new())
    }

    #[test]
    fn test_override_beats_work_experience() {
        let records = AffiliationRecords {
            roles: vec![role("acme", Some(day(2020, 1, 1)), None)],
            overrides: vec![SegmentAffiliation::new("m", "seg", Some("globex"))
                .with_dates(Some(day(2021, 1, 1)), None)],
        };
        assert_eq!(resolve(&records, day(2021, 6, 1)).as_deref(), Some("globex"));
        // Outside the override interval the role applies
        assert_eq!(resolve(&records, day(2020, 6, 1)).as_deref(), Some("acme"));
    }

    #[test]
    fn test_override_in_other_segment_is_ignored() {
        let records = AffiliationRecords {
            roles: vec![role("acme", Some(day(2020, 1, 1)), None)],
            overrides: vec![SegmentAffiliation::new("m", "other", Some("globex"))],
        };
        assert_eq!(resolve(&records, day(2021, 6, 1)).as_deref(), Some("acme"));
    }

    #[test]
    fn test_null_override_pins_unaffiliated() {
        let records = AffiliationRecords {
            roles: vec![role("acme", Some(day(2020, 1, 1)), None), role("initech", None, None)],
            overrides: vec![SegmentAffiliation::new("m", "seg", None)],
        };
        assert_eq!(resolve(&records, day(2021, 6, 1)), None);
    }

    #[test]
    fn test_most_recent_override_wins() {
        let records = AffiliationRecords {
            roles: Vec::new(),
            overrides: vec![
                SegmentAffiliation::new("m", "seg", Some("old")).with_dates(Some(day(2019, 1, 1)), None),
                SegmentAffiliation::new("m", "seg", Some("new")).with_dates(Some(day(2020, 1, 1)), None),
            ],
        };
        assert_eq!(resolve(&records, day(2021, 1, 1)).as_deref(), Some("new"));
    }

    #[test]
    fn test_containment_edges() {
        let records = AffiliationRecords {
            roles: vec![role("acme", Some(day(2020, 1, 1)), Some(day(2020, 12, 31)))],
            overrides: Vec::new(),
        };
        assert_eq!(resolve(&records, day(2020, 1, 1)).as_deref(), Some("acme"));
        assert_eq!(resolve(&records, day(2020, 12, 31)).as_deref(), Some("acme"));
        assert_eq!(resolve(&records, day(2021, 1, 1)), None);
    }

    #[test]
    fn test_inverted_end_only_and_disallowed_roles_are_ignored() {
        let mut disallowed = role("hidden", Some(day(2020, 1, 1)), None);
        disallowed.allow_affiliation = false;
        let records = AffiliationRecords {
            roles: vec![
                role("inverted", Some(day(2021, 1, 1)), Some(day(2020, 1, 1))),
                role("end-only", None, Some(day(2022, 1, 1))),
                disallowed,
            ],
            overrides: Vec::new(),
        };
        assert_eq!(resolve(&records, day(2020, 6, 1)), None);
    }

    #[test]
    fn test_ignored_titles_are_skipped() {
        let records = AffiliationRecords {
            roles: vec![
                role("vc", Some(day(2020, 1, 1)), None).with_title("Angel investor"),
                role("acme", Some(day(2019, 1, 1)), None).with_title("Engineer"),
            ],
            overrides: Vec::new(),
        };
        assert_eq!(resolve(&records, day(2021, 1, 1)).as_deref(), Some("acme"));
    }

    #[test]
    fn test_unknown_dated_fallbacks() {
        let mut early = role("early", None, None);
        early.created_at = day(2020, 1, 1);
        let mut late = role("late", None, None);
        late.created_at = day(2022, 1, 1);
        let records = AffiliationRecords {
            roles: vec![early, late],
            overrides: Vec::new(),
        };

        // Level 3: latest created_at not after ts
        assert_eq!(resolve(&records, day(2021, 1, 1)).as_deref(), Some("early"));
        assert_eq!(resolve(&records, day(2023, 1, 1)).as_deref(), Some("late"));
        // Level 4: nothing known yet at ts, fall back to any unknown-dated row
        assert!(resolve(&records, day(2010, 1, 1)).is_some());
    }

    #[test]
    fn test_tie_break_prefers_primary_flag() {
        let records = AffiliationRecords {
            roles: vec![
                role("a", Some(day(2020, 1, 1)), None),
                role("b", Some(day(2021, 1, 1)), None).primary(),
            ],
            overrides: Vec::new(),
        };
        assert_eq!(resolve(&records, day(2022, 1, 1)).as_deref(), Some("b"));
    }

    #[test]
    fn test_tie_break_prefers_strictly_larger_org() {
        let records = AffiliationRecords {
            roles: vec![
                role("small", Some(day(2020, 1, 1)), None),
                role("big", Some(day(2021, 1, 1)), None),
            ],
            overrides: Vec::new(),
        };
        let mut estimates = HashMap::new();
        estimates.insert("small".to_string(), Some(10));
        estimates.insert("big".to_string(), Some(5000));
        let got = resolve_with_estimates(&records, "seg", day(2022, 1, 1), &ignored(), &estimates);
        assert_eq!(got.as_deref(), Some("big"));

        // Equal sizes fall through to the interval stage: earlier open-ended start wins
        estimates.insert("big".to_string(), Some(10));
        let got = resolve_with_estimates(&records, "seg", day(2022, 1, 1), &ignored(), &estimates);
        assert_eq!(got.as_deref(), Some("small"));

        // Unknown size for either also falls through
        estimates.insert("big".to_string(), None);
        let got = resolve_with_estimates(&records, "seg", day(2022, 1, 1), &ignored(), &estimates);
        assert_eq!(got.as_deref(), Some("small"));
    }

    #[test]
    fn test_tie_break_open_ended_beats_bounded() {
        let records = AffiliationRecords {
            roles: vec![
                role("bounded", Some(day(2000, 1, 1)), Some(day(2030, 1, 1))),
                role("open", Some(day(2020, 1, 1)), None),
            ],
            overrides: Vec::new(),
        };
        assert_eq!(resolve(&records, day(2022, 1, 1)).as_deref(), Some("open"));
    }

    #[test]
    fn test_tie_break_longest_bounded_interval() {
        let records = AffiliationRecords {
            roles: vec![
                role("short", Some(day(2021, 1, 1)), Some(day(2022, 6, 1))),
                role("long", Some(day(2015, 1, 1)), Some(day(2022, 6, 1))),
            ],
            overrides: Vec::new(),
        };
        assert_eq!(resolve(&records, day(2022, 1, 1)).as_deref(), Some("long"));
    }

    #[test]
    fn test_tie_break_is_deterministic_under_reordering() {
        let base = day(2020, 1, 1);
        let mut roles: Vec<MemberOrganization> = (0..6)
            .map(|i| {
                let mut r = role(&format!("org-{}", i % 3), Some(base), Some(base + Duration::days(400)));
                r.id = format!("role-{}", i);
                r.created_at = base;
                r
            })
            .collect();

        let first = resolve(
            &AffiliationRecords {
                roles: roles.clone(),
                overrides: Vec::new(),
            },
            day(2020, 6, 1),
        );
        roles.reverse();
        let second = resolve(
            &AffiliationRecords {
                roles,
                overrides: Vec::new(),
            },
            day(2020, 6, 1),
        );
        assert_eq!(first, second);
        assert_eq!(first.as_deref(), Some("org-0"));
    }

    #[test]
    fn test_single_shared_org_skips_tie_break() {
        let records = AffiliationRecords {
            roles: vec![
                role("acme", Some(day(2019, 1, 1)), None),
                role("acme", Some(day(2020, 1, 1)), Some(day(2023, 1, 1))),
            ],
            overrides: Vec::new(),
        };
        let outcome = cascade(&records, "seg", day(2021, 1, 1), &ignored());
        assert_eq!(outcome, CascadeOutcome::Resolved(Some("acme".to_string())));
    }
}
