//! Platform identities (usernames, emails, domains) of members and organizations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity type used to split activities back on unmerge
pub const USERNAME_IDENTITY: &str = "username";

/// One identity of a member or organization
///
/// Unique per owner on (platform, type, value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub platform: String,
    #[serde(rename = "type")]
    pub identity_type: String,
    pub value: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(platform: &str, identity_type: &str, value: &str, verified: bool) -> Self {
        Self {
            platform: platform.to_string(),
            identity_type: identity_type.to_string(),
            value: value.to_string(),
            verified,
            created_at: crowd_common::time::now(),
        }
    }

    pub fn username(platform: &str, value: &str) -> Self {
        Self::new(platform, USERNAME_IDENTITY, value, false)
    }

    /// Uniqueness key within one owner
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.platform, &self.identity_type, &self.value)
    }

    pub fn same_key(&self, other: &Identity) -> bool {
        self.key() == other.key()
    }

    pub fn is_username(&self) -> bool {
        self.identity_type == USERNAME_IDENTITY
    }
}
