//! Organization profile

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub display_name: String,
    pub attributes: Value,
    pub manually_created: bool,
    /// Derived estimate used by the affiliation tie-break; not authoritative
    pub member_count_estimate: Option<i64>,
    pub activity_count_estimate: Option<i64>,
    pub merged_into: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(display_name: &str) -> Self {
        let now = crowd_common::time::now();
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            attributes: Value::Object(Default::default()),
            manually_created: false,
            member_count_estimate: None,
            activity_count_estimate: None,
            merged_into: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_merged_away(&self) -> bool {
        self.merged_into.is_some()
    }
}
