//! Member profile

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Per-platform follower counts plus a `total` entry
pub type Reach = BTreeMap<String, i64>;

/// Key holding the overall reach
pub const REACH_TOTAL: &str = "total";

/// A person across platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub display_name: String,
    pub joined_at: Option<DateTime<Utc>>,
    /// attribute name -> source -> value (`default` is the displayed value)
    pub attributes: Value,
    pub manually_created: bool,
    pub manually_changed_fields: Vec<String>,
    pub reach: Reach,
    pub contributions: Option<Value>,
    /// Set once this member has been merged into another one
    pub merged_into: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn new(display_name: &str) -> Self {
        let now = crowd_common::time::now();
        Self {
            id: Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            joined_at: None,
            attributes: Value::Object(Default::default()),
            manually_created: false,
            manually_changed_fields: Vec::new(),
            reach: Reach::new(),
            contributions: None,
            merged_into: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_merged_away(&self) -> bool {
        self.merged_into.is_some()
    }
}
