//! Versioned unmerge backup
//!
//! Stored as JSON on the merge action before any merge mutation:
//!
//! ```json
//! { "schemaVersion": 1, "type": "member", "primary": {...}, "secondary": {...} }
//! ```
//!
//! Each side holds everything needed to rebuild the entity as it was.

use crowd_common::events::EntityKind;
use crowd_common::{Error, Result};
use serde::{Deserialize, Serialize};

use super::{Identity, Member, MemberOrganization, Organization, SegmentAffiliation};

pub const BACKUP_SCHEMA_VERSION: u32 = 1;

/// Full state of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub member: Member,
    pub identities: Vec<Identity>,
    pub roles: Vec<MemberOrganization>,
    pub segment_affiliations: Vec<SegmentAffiliation>,
    pub tags: Vec<String>,
    pub tasks: Vec<String>,
}

/// Full state of one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSnapshot {
    pub organization: Organization,
    pub identities: Vec<Identity>,
    /// Roles of any member at this organization
    pub roles: Vec<MemberOrganization>,
    /// Overrides pointing at this organization
    pub segment_affiliations: Vec<SegmentAffiliation>,
}

impl MemberSnapshot {
    pub fn id(&self) -> &str {
        &self.member.id
    }
}

impl OrganizationSnapshot {
    pub fn id(&self) -> &str {
        &self.organization.id
    }
}

/// Both sides of a merge, tagged by entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackupPayload {
    #[serde(rename = "member")]
    Member {
        primary: MemberSnapshot,
        secondary: MemberSnapshot,
    },
    #[serde(rename = "org")]
    Organization {
        primary: OrganizationSnapshot,
        secondary: OrganizationSnapshot,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBackup {
    pub schema_version: u32,
    #[serde(flatten)]
    pub payload: BackupPayload,
}

impl MergeBackup {
    pub fn members(primary: MemberSnapshot, secondary: MemberSnapshot) -> Self {
        Self {
            schema_version: BACKUP_SCHEMA_VERSION,
            payload: BackupPayload::Member { primary, secondary },
        }
    }

    pub fn organizations(primary: OrganizationSnapshot, secondary: OrganizationSnapshot) -> Self {
        Self {
            schema_version: BACKUP_SCHEMA_VERSION,
            payload: BackupPayload::Organization { primary, secondary },
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self.payload {
            BackupPayload::Member { .. } => EntityKind::Member,
            BackupPayload::Organization { .. } => EntityKind::Organization,
        }
    }

    fn ids(&self) -> (&str, &str) {
        match &self.payload {
            BackupPayload::Member { primary, secondary } => (primary.id(), secondary.id()),
            BackupPayload::Organization { primary, secondary } => (primary.id(), secondary.id()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored backup and check it belongs to the given merge.
    ///
    /// Any mismatch is a [`Error::DataIntegrity`]; nothing may be written from
    /// a backup that fails here.
    pub fn parse_validated(
        raw: Option<&str>,
        entity: EntityKind,
        primary_id: &str,
        secondary_id: &str,
    ) -> Result<Self> {
        let raw = raw.ok_or_else(|| {
            Error::DataIntegrity(format!(
                "Merge {} -> {} has no unmerge backup",
                secondary_id, primary_id
            ))
        })?;

        let version = serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|e| Error::DataIntegrity(format!("Unmerge backup is not JSON: {}", e)))?
            .get("schemaVersion")
            .and_then(|v| v.as_u64());
        if version != Some(u64::from(BACKUP_SCHEMA_VERSION)) {
            return Err(Error::DataIntegrity(format!(
                "Unsupported unmerge backup schema version {:?}",
                version
            )));
        }

        let backup: MergeBackup = serde_json::from_str(raw)
            .map_err(|e| Error::DataIntegrity(format!("Malformed unmerge backup: {}", e)))?;

        if backup.entity() != entity {
            return Err(Error::DataIntegrity(format!(
                "Unmerge backup is for {} but merge action is {}",
                backup.entity().as_str(),
                entity.as_str()
            )));
        }

        let (backup_primary, backup_secondary) = backup.ids();
        if backup_primary != primary_id || backup_secondary != secondary_id {
            return Err(Error::DataIntegrity(format!(
                "Unmerge backup covers {} -> {}, expected {} -> {}",
                backup_secondary, backup_primary, secondary_id, primary_id
            )));
        }

        Ok(backup)
    }
}
