//! Merge action state machine
//!
//! A merge action walks a fixed sequence of steps. `step` records the last
//! completed step and only ever moves forward, which is what makes a failed merge
//! resumable: re-running from the recorded step repeats only idempotent work.
//!
//! member: merge-started → identities-merged → activities-moved → attributes-merged
//!         → organizations-merged → done
//! org:    merge-started → identities-merged → activities-moved → attributes-merged
//!         → members-merged → done

use chrono::{DateTime, Utc};
use crowd_common::events::EntityKind;
use crowd_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall state of a merge action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeState {
    InProgress,
    Done,
    Error,
    /// Terminal: the merge was reverted
    Unmerged,
}

impl MergeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeState::InProgress => "in-progress",
            MergeState::Done => "done",
            MergeState::Error => "error",
            MergeState::Unmerged => "unmerged",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "in-progress" => Ok(MergeState::InProgress),
            "done" => Ok(MergeState::Done),
            "error" => Ok(MergeState::Error),
            "unmerged" => Ok(MergeState::Unmerged),
            other => Err(Error::DataIntegrity(format!("Unknown merge state '{}'", other))),
        }
    }
}

/// Last completed step of a merge action
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStep {
    MergeStarted,
    IdentitiesMerged,
    ActivitiesMoved,
    AttributesMerged,
    /// Member merges: roles reparented
    OrganizationsMerged,
    /// Organization merges: roles reparented
    MembersMerged,
    Done,
    Unmerged,
}

const MEMBER_STEPS: &[MergeStep] = &[
    MergeStep::MergeStarted,
    MergeStep::IdentitiesMerged,
    MergeStep::ActivitiesMoved,
    MergeStep::AttributesMerged,
    MergeStep::OrganizationsMerged,
    MergeStep::Done,
];

const ORGANIZATION_STEPS: &[MergeStep] = &[
    MergeStep::MergeStarted,
    MergeStep::IdentitiesMerged,
    MergeStep::ActivitiesMoved,
    MergeStep::AttributesMerged,
    MergeStep::MembersMerged,
    MergeStep::Done,
];

impl MergeStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStep::MergeStarted => "merge-started",
            MergeStep::IdentitiesMerged => "identities-merged",
            MergeStep::ActivitiesMoved => "activities-moved",
            MergeStep::AttributesMerged => "attributes-merged",
            MergeStep::OrganizationsMerged => "organizations-merged",
            MergeStep::MembersMerged => "members-merged",
            MergeStep::Done => "done",
            MergeStep::Unmerged => "unmerged",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "merge-started" => Ok(MergeStep::MergeStarted),
            "identities-merged" => Ok(MergeStep::IdentitiesMerged),
            "activities-moved" => Ok(MergeStep::ActivitiesMoved),
            "attributes-merged" => Ok(MergeStep::AttributesMerged),
            "organizations-merged" => Ok(MergeStep::OrganizationsMerged),
            "members-merged" => Ok(MergeStep::MembersMerged),
            "done" => Ok(MergeStep::Done),
            "unmerged" => Ok(MergeStep::Unmerged),
            other => Err(Error::DataIntegrity(format!("Unknown merge step '{}'", other))),
        }
    }

    /// Ordered steps for an entity kind
    pub fn sequence(kind: EntityKind) -> &'static [MergeStep] {
        match kind {
            EntityKind::Member => MEMBER_STEPS,
            EntityKind::Organization => ORGANIZATION_STEPS,
        }
    }

    /// Step that follows `self`, `None` once done (or if `self` is foreign to `kind`)
    pub fn next(self, kind: EntityKind) -> Option<MergeStep> {
        let steps = Self::sequence(kind);
        let position = steps.iter().position(|s| *s == self)?;
        steps.get(position + 1).copied()
    }
}

/// Unordered pair key, so A→B and B→A share one in-progress slot
pub fn normalized_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// One merge of `secondary_id` into `primary_id`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeAction {
    pub id: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub entity: EntityKind,
    pub primary_id: String,
    pub secondary_id: String,
    pub step: MergeStep,
    pub state: MergeState,
    /// Serialized [`super::MergeBackup`]
    #[serde(skip)]
    pub unmerge_backup: Option<String>,
    pub last_error: Option<String>,
    pub action_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MergeAction {
    pub fn new(
        tenant_id: &str,
        entity: EntityKind,
        primary_id: &str,
        secondary_id: &str,
        action_by: Option<&str>,
    ) -> Self {
        let now = crowd_common::time::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            entity,
            primary_id: primary_id.to_string(),
            secondary_id: secondary_id.to_string(),
            step: MergeStep::MergeStarted,
            state: MergeState::InProgress,
            unmerge_backup: None,
            last_error: None,
            action_by: action_by.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> MergeStatus {
        MergeStatus {
            id: self.id.clone(),
            entity: self.entity,
            state: self.state,
            step: self.step,
            last_error: self.last_error.clone(),
        }
    }
}

/// Externally visible progress of a merge action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub entity: EntityKind,
    pub state: MergeState,
    pub step: MergeStep,
    pub last_error: Option<String>,
}
