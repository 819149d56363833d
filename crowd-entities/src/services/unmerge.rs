//! Unmerge: restore both entities from the merge backup
//!
//! Everything happens in one transaction. The backup is validated before the
//! first write; activities are split back by identity (members) or by
//! re-resolving affiliations over the backed-up roles (organizations).

use crowd_common::config::ServiceConfig;
use crowd_common::events::{CrowdEvent, EntityKind, EventBus};
use crowd_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use super::affiliation_resolver::{resolve_with_estimates, AffiliationResolver};
use super::merge_backup;
use crate::db::{activities, merge_actions};
use crate::models::{AffiliationRecords, BackupPayload, MemberSnapshot, MergeBackup, MergeState, OrganizationSnapshot};
use crate::utils::begin_monitored;

#[derive(Clone)]
pub struct UnmergeOrchestrator {
    pool: SqlitePool,
    event_bus: EventBus,
    resolver: AffiliationResolver,
    restamp_after_unmerge: bool,
}

impl UnmergeOrchestrator {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        config: &ServiceConfig,
        resolver: AffiliationResolver,
    ) -> Self {
        Self {
            pool,
            event_bus,
            resolver,
            restamp_after_unmerge: config.merge.restamp_after_merge,
        }
    }

    /// Revert the latest completed merge of `secondary_id` into `primary_id`.
    ///
    /// Returns the id of the reverted merge action.
    pub async fn start_unmerge(
        &self,
        primary_id: &str,
        secondary_id: &str,
        action_by: Option<&str>,
    ) -> Result<String> {
        let mut tx = begin_monitored(&self.pool, "unmerge").await?;

        let action = merge_actions::latest_for_pair(tx.conn(), None, primary_id, secondary_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("No merge of {} into {}", secondary_id, primary_id))
            })?;

        if action.state != MergeState::Done {
            return Err(Error::Conflict(format!(
                "Merge action {} is {}; only completed merges can be reverted",
                action.id,
                action.state.as_str()
            )));
        }
        if let Some(running) =
            merge_actions::find_in_progress_for_pair(tx.conn(), action.entity, primary_id, secondary_id).await?
        {
            return Err(Error::Conflict(format!(
                "Merge action {} for this pair is in progress",
                running.id
            )));
        }

        let backup = MergeBackup::parse_validated(
            action.unmerge_backup.as_deref(),
            action.entity,
            primary_id,
            secondary_id,
        )?;

        let ignored_titles = self.resolver.ignored_titles().to_vec();
        let activities_moved = match &backup.payload {
            BackupPayload::Member { primary, secondary } => {
                let moved = split_member_activities(tx.conn(), primary, secondary).await?;
                merge_backup::restore_members(tx.conn(), primary, secondary).await?;
                moved
            }
            BackupPayload::Organization { primary, secondary } => {
                let moved = split_organization_activities(tx.conn(), primary, secondary, &ignored_titles).await?;
                merge_backup::restore_organizations(tx.conn(), primary, secondary).await?;
                moved
            }
        };

        if !merge_actions::mark_unmerged_if_done(tx.conn(), &action.id).await? {
            return Err(Error::Conflict(format!(
                "Merge action {} was reverted concurrently",
                action.id
            )));
        }
        tx.commit().await?;

        info!(
            merge_action_id = %action.id,
            entity = action.entity.as_str(),
            primary_id,
            secondary_id,
            activities_moved,
            "Unmerge completed"
        );

        self.event_bus
            .emit_lossy(CrowdEvent::entity_changed(action.entity, primary_id));
        self.event_bus
            .emit_lossy(CrowdEvent::entity_changed(action.entity, secondary_id));
        self.event_bus.emit_lossy(CrowdEvent::UnmergeCompleted {
            merge_action_id: action.id.clone(),
            entity: action.entity,
            primary_id: primary_id.to_string(),
            secondary_id: secondary_id.to_string(),
            activities_moved,
            action_by: action_by.map(str::to_string),
            timestamp: crowd_common::time::now(),
        });

        if action.entity == EntityKind::Member && self.restamp_after_unmerge {
            for member_id in [primary_id, secondary_id] {
                if let Err(e) = self.resolver.restamp_member_activities(member_id).await {
                    warn!(member_id, error = %e, "Restamping after unmerge failed");
                }
            }
        }

        Ok(action.id)
    }
}

/// Move back activities authored under usernames only the secondary owned
async fn split_member_activities(
    conn: &mut SqliteConnection,
    primary: &MemberSnapshot,
    secondary: &MemberSnapshot,
) -> Result<u64> {
    let primary_usernames: HashSet<(&str, &str)> = primary
        .identities
        .iter()
        .filter(|i| i.is_username())
        .map(|i| (i.platform.as_str(), i.value.as_str()))
        .collect();

    let mut moved = 0u64;
    for identity in secondary.identities.iter().filter(|i| i.is_username()) {
        let key = (identity.platform.as_str(), identity.value.as_str());
        if primary_usernames.contains(&key) {
            continue;
        }
        moved += activities::move_member_activities_by_username(
            conn,
            primary.id(),
            secondary.id(),
            key.0,
            key.1,
        )
        .await?;
        let object_refs = activities::move_object_member_by_username(
            conn,
            primary.id(),
            secondary.id(),
            key.0,
            key.1,
        )
        .await?;
        debug!(platform = key.0, username = key.1, object_refs, "Split activities for identity");
    }
    Ok(moved)
}

/// Re-resolve activities of members with a role at the secondary
async fn split_organization_activities(
    conn: &mut SqliteConnection,
    primary: &OrganizationSnapshot,
    secondary: &OrganizationSnapshot,
    ignored_titles: &[String],
) -> Result<u64> {
    let (primary_id, secondary_id) = (primary.id(), secondary.id());

    let mut estimates = HashMap::new();
    estimates.insert(primary_id.to_string(), primary.organization.member_count_estimate);
    estimates.insert(secondary_id.to_string(), secondary.organization.member_count_estimate);

    let members: BTreeSet<&str> = secondary
        .roles
        .iter()
        .map(|r| r.member_id.as_str())
        .chain(secondary.segment_affiliations.iter().map(|o| o.member_id.as_str()))
        .collect();

    let mut moved = 0u64;
    for member_id in members {
        let records = AffiliationRecords {
            roles: primary
                .roles
                .iter()
                .chain(&secondary.roles)
                .filter(|r| r.member_id == member_id)
                .cloned()
                .collect(),
            overrides: primary
                .segment_affiliations
                .iter()
                .chain(&secondary.segment_affiliations)
                .filter(|o| o.member_id == member_id)
                .cloned()
                .collect(),
        };

        for stamp in activities::member_stamps_at_organization(conn, primary_id, member_id).await? {
            let resolved =
                resolve_with_estimates(&records, &stamp.segment_id, stamp.timestamp, ignored_titles, &estimates);
            if resolved.as_deref() == Some(secondary_id) {
                activities::set_activity_organization(conn, &stamp.id, Some(secondary_id)).await?;
                moved += 1;
            }
        }
    }
    Ok(moved)
}
