//! Work experience (member ↔ organization roles) and manual segment overrides

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A member's role at an organization ("work experience")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberOrganization {
    pub id: String,
    pub member_id: String,
    pub organization_id: String,
    pub title: Option<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub is_primary_organization: bool,
    /// `false` excludes this role from affiliation resolution
    pub allow_affiliation: bool,
    pub created_at: DateTime<Utc>,
}

impl MemberOrganization {
    pub fn new(member_id: &str, organization_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            member_id: member_id.to_string(),
            organization_id: organization_id.to_string(),
            title: None,
            date_start: None,
            date_end: None,
            source: None,
            is_primary_organization: false,
            allow_affiliation: true,
            created_at: crowd_common::time::now(),
        }
    }

    pub fn with_dates(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.date_start = start;
        self.date_end = end;
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary_organization = true;
        self
    }

    /// Neither start nor end known
    pub fn is_unknown_dated(&self) -> bool {
        self.date_start.is_none() && self.date_end.is_none()
    }

    /// Only an end date: malformed, never used for affiliation
    pub fn is_end_only(&self) -> bool {
        self.date_start.is_none() && self.date_end.is_some()
    }

    /// Started and not ended
    pub fn is_current(&self) -> bool {
        self.date_start.is_some() && self.date_end.is_none()
    }

    /// Start and end both known
    pub fn is_bounded(&self) -> bool {
        self.date_start.is_some() && self.date_end.is_some()
    }

    /// `[date_start, date_end]` contains `ts`; open end means still active.
    /// Inverted intervals contain nothing.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        match (self.date_start, self.date_end) {
            (Some(start), None) => start <= ts,
            (Some(start), Some(end)) => start <= end && start <= ts && ts <= end,
            _ => false,
        }
    }

    /// Same start and end
    pub fn same_dates(&self, other: &MemberOrganization) -> bool {
        self.date_start == other.date_start && self.date_end == other.date_end
    }
}

/// Manual per-segment affiliation override
///
/// `organization_id = None` pins the member as unaffiliated for the interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAffiliation {
    pub id: String,
    pub member_id: String,
    pub segment_id: String,
    pub organization_id: Option<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
}

impl SegmentAffiliation {
    pub fn new(member_id: &str, segment_id: &str, organization_id: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            member_id: member_id.to_string(),
            segment_id: segment_id.to_string(),
            organization_id: organization_id.map(str::to_string),
            date_start: None,
            date_end: None,
        }
    }

    pub fn with_dates(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.date_start = start;
        self.date_end = end;
        self
    }

    /// Null start = since forever, null end = still active
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.date_start.map_or(true, |start| start <= ts)
            && self.date_end.map_or(true, |end| ts <= end)
    }
}

/// Request body item for replacing a member's manual overrides
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAffiliationInput {
    pub segment_id: String,
    pub organization_id: Option<String>,
    pub date_start: Option<DateTime<Utc>>,
    pub date_end: Option<DateTime<Utc>>,
}

impl SegmentAffiliationInput {
    pub fn into_affiliation(self, member_id: &str) -> SegmentAffiliation {
        SegmentAffiliation::new(member_id, &self.segment_id, self.organization_id.as_deref())
            .with_dates(self.date_start, self.date_end)
    }
}

/// Everything the resolver needs about one member
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AffiliationRecords {
    pub roles: Vec<MemberOrganization>,
    /// Overrides across all segments
    pub overrides: Vec<SegmentAffiliation>,
}
