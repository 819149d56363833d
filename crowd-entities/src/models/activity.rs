//! Activities and their denormalized relation rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single contribution/interaction of a member on a platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub member_id: String,
    /// Organization the member was affiliated with at `timestamp`
    pub organization_id: Option<String>,
    pub segment_id: String,
    pub platform: String,
    pub username: String,
    pub object_member_id: Option<String>,
    pub object_member_username: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub source_id: String,
    pub sentiment: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        member_id: &str,
        segment_id: &str,
        platform: &str,
        username: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            source_id: id.clone(),
            id,
            member_id: member_id.to_string(),
            organization_id: None,
            segment_id: segment_id.to_string(),
            platform: platform.to_string(),
            username: username.to_string(),
            object_member_id: None,
            object_member_username: None,
            timestamp,
            activity_type: "activity".to_string(),
            sentiment: None,
            created_at: crowd_common::time::now(),
        }
    }
}

/// Minimal view used when re-evaluating affiliation of existing activities
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityStamp {
    pub id: String,
    pub member_id: String,
    pub segment_id: String,
    pub organization_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}
