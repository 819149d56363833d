//! Merge orchestration
//!
//! Drives a merge action through its steps. Every step commits together with the
//! step marker, except activity relocation which commits once per batch and marks
//! the step when nothing references the secondary any more. A failed merge keeps
//! the last completed step; starting the same merge again resumes from there.

use crowd_common::config::{MergeConfig, ServiceConfig};
use crowd_common::events::{CrowdEvent, EntityKind, EventBus};
use crowd_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use super::affiliation_resolver::AffiliationResolver;
use super::{merge_backup, role_merger};
use crate::db::activities::{self, ActivityReference};
use crate::db::members::{self, MemberLink};
use crate::db::{affiliations, identities, merge_actions, organizations};
use crate::models::attributes::{merge_member_profile, merge_organization_profile};
use crate::models::{MergeAction, MergeState, MergeStatus, MergeStep};
use crate::utils::{begin_monitored, retry_transient, with_timeout};

#[derive(Clone)]
pub struct MergeOrchestrator {
    pool: SqlitePool,
    event_bus: EventBus,
    config: MergeConfig,
    tenant_id: String,
    resolver: AffiliationResolver,
}

impl MergeOrchestrator {
    pub fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        config: &ServiceConfig,
        resolver: AffiliationResolver,
    ) -> Self {
        Self {
            pool,
            event_bus,
            config: config.merge.clone(),
            tenant_id: config.tenant_id.clone(),
            resolver,
        }
    }

    /// Merge `secondary_id` into `primary_id` and wait for completion.
    ///
    /// Returns the merge action id. An earlier merge of the same ordered pair that
    /// stopped in ERROR is resumed instead of starting over.
    pub async fn start_merge(
        &self,
        entity: EntityKind,
        primary_id: &str,
        secondary_id: &str,
        action_by: Option<&str>,
    ) -> Result<String> {
        let action_id = self.begin_merge(entity, primary_id, secondary_id, action_by).await?;
        self.execute_merge(&action_id).await?;
        Ok(action_id)
    }

    /// Validate and record the merge action without running any step.
    ///
    /// The backup of both entities is written together with the action.
    pub async fn begin_merge(
        &self,
        entity: EntityKind,
        primary_id: &str,
        secondary_id: &str,
        action_by: Option<&str>,
    ) -> Result<String> {
        if primary_id == secondary_id {
            return Err(Error::InvalidInput(format!(
                "Cannot merge {} {} into itself",
                entity.as_str(),
                primary_id
            )));
        }

        let mut tx = begin_monitored(&self.pool, "merge::begin").await?;

        // Resume an errored merge of the same direction
        if let Some(previous) =
            merge_actions::latest_for_pair(tx.conn(), Some(entity), primary_id, secondary_id).await?
        {
            if previous.state == MergeState::Error {
                if !merge_actions::reopen_if_error(tx.conn(), &previous.id).await? {
                    return Err(Error::Conflict(format!(
                        "Merge action {} changed state concurrently",
                        previous.id
                    )));
                }
                tx.commit().await?;
                info!(
                    merge_action_id = %previous.id,
                    primary_id,
                    secondary_id,
                    step = previous.step.as_str(),
                    "Resuming merge from last completed step"
                );
                return Ok(previous.id);
            }
        }

        if let Some(running) =
            merge_actions::find_in_progress_for_pair(tx.conn(), entity, primary_id, secondary_id).await?
        {
            return Err(Error::Conflict(format!(
                "Merge action {} for this pair is already in progress",
                running.id
            )));
        }

        if let Some(reversed) =
            merge_actions::latest_for_pair(tx.conn(), Some(entity), secondary_id, primary_id).await?
        {
            if reversed.state == MergeState::Error {
                return Err(Error::Conflict(format!(
                    "Merge action {} in the opposite direction failed and must be resumed first",
                    reversed.id
                )));
            }
        }

        for id in [primary_id, secondary_id] {
            let merged_into = match entity {
                EntityKind::Member => members::load_member(tx.conn(), id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Member not found: {}", id)))?
                    .merged_into,
                EntityKind::Organization => organizations::load_organization(tx.conn(), id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Organization not found: {}", id)))?
                    .merged_into,
            };
            if let Some(target) = merged_into {
                return Err(Error::Conflict(format!(
                    "{} {} was already merged into {}",
                    entity.as_str(),
                    id,
                    target
                )));
            }
        }

        let backup = merge_backup::snapshot_pair(tx.conn(), entity, primary_id, secondary_id).await?;
        let mut action = MergeAction::new(&self.tenant_id, entity, primary_id, secondary_id, action_by);
        action.unmerge_backup = Some(backup.to_json()?);
        merge_actions::insert_action(tx.conn(), &action).await?;
        tx.commit().await?;

        info!(
            merge_action_id = %action.id,
            entity = entity.as_str(),
            primary_id,
            secondary_id,
            "Merge started"
        );
        Ok(action.id)
    }

    /// Run the remaining steps of an in-progress action
    pub async fn execute_merge(&self, action_id: &str) -> Result<()> {
        let action = {
            let mut conn = self.pool.acquire().await?;
            merge_actions::load_action(&mut conn, action_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Merge action not found: {}", action_id)))?
        };

        match action.state {
            MergeState::InProgress => {}
            MergeState::Done => return Ok(()),
            other => {
                return Err(Error::Conflict(format!(
                    "Merge action {} is {}, not in progress",
                    action_id,
                    other.as_str()
                )))
            }
        }

        let mut completed = action.step;
        while let Some(next) = completed.next(action.entity) {
            debug!(merge_action_id = %action.id, step = next.as_str(), "Running merge step");
            if let Err(e) = self.run_step(&action, next).await {
                self.record_failure(&action, completed, &e).await;
                return Err(e);
            }
            completed = next;
        }

        info!(
            merge_action_id = %action.id,
            entity = action.entity.as_str(),
            primary_id = %action.primary_id,
            secondary_id = %action.secondary_id,
            "Merge completed"
        );

        self.event_bus
            .emit_lossy(CrowdEvent::entity_changed(action.entity, &action.primary_id));
        self.event_bus
            .emit_lossy(CrowdEvent::entity_changed(action.entity, &action.secondary_id));
        self.event_bus.emit_lossy(CrowdEvent::MergeCompleted {
            merge_action_id: action.id.clone(),
            entity: action.entity,
            primary_id: action.primary_id.clone(),
            secondary_id: action.secondary_id.clone(),
            action_by: action.action_by.clone(),
            timestamp: crowd_common::time::now(),
        });

        if action.entity == EntityKind::Member && self.config.restamp_after_merge {
            if let Err(e) = self.resolver.restamp_member_activities(&action.primary_id).await {
                warn!(
                    merge_action_id = %action.id,
                    member_id = %action.primary_id,
                    error = %e,
                    "Restamping merged member activities failed"
                );
            }
        }

        Ok(())
    }

    /// Reopen an action stopped in ERROR and run its remaining steps
    pub async fn resume_merge(&self, action_id: &str) -> Result<()> {
        let reopened = {
            let mut conn = self.pool.acquire().await?;
            merge_actions::reopen_if_error(&mut conn, action_id).await?
        };
        if !reopened {
            return Err(Error::Conflict(format!(
                "Merge action {} is not in error state",
                action_id
            )));
        }
        self.execute_merge(action_id).await
    }

    pub async fn get_merge_status(&self, action_id: &str) -> Result<Option<MergeStatus>> {
        let mut conn = self.pool.acquire().await?;
        let action = merge_actions::load_action(&mut conn, action_id).await?;
        Ok(action.map(|a| a.status()))
    }

    async fn run_step(&self, action: &MergeAction, step: MergeStep) -> Result<()> {
        match step {
            MergeStep::IdentitiesMerged => self.merge_identities(action).await,
            MergeStep::ActivitiesMoved => self.move_activities(action).await,
            MergeStep::AttributesMerged => self.merge_attributes(action).await,
            MergeStep::OrganizationsMerged | MergeStep::MembersMerged => self.merge_roles(action, step).await,
            MergeStep::Done => self.finalize(action).await,
            MergeStep::MergeStarted | MergeStep::Unmerged => Err(Error::Internal(format!(
                "{} is not an executable merge step",
                step.as_str()
            ))),
        }
    }

    async fn merge_identities(&self, action: &MergeAction) -> Result<()> {
        let mut tx = begin_monitored(&self.pool, "merge::identities").await?;
        let outcome = identities::merge_identities(
            tx.conn(),
            action.entity,
            &action.primary_id,
            &action.secondary_id,
        )
        .await?;
        merge_actions::update_step(tx.conn(), &action.id, MergeStep::IdentitiesMerged).await?;
        tx.commit().await?;

        debug!(
            merge_action_id = %action.id,
            moved = outcome.moved,
            dropped = outcome.dropped,
            verified = outcome.verified,
            "Identities merged"
        );
        Ok(())
    }

    async fn move_activities(&self, action: &MergeAction) -> Result<()> {
        let references: &[ActivityReference] = match action.entity {
            EntityKind::Member => &[ActivityReference::Member, ActivityReference::ObjectMember],
            EntityKind::Organization => &[ActivityReference::Organization],
        };
        let batch_size = self.config.batch_size.max(1);
        let budget = self.config.statement_timeout();
        let pool = &self.pool;
        let (from, to) = (action.secondary_id.as_str(), action.primary_id.as_str());

        let mut total = 0u64;
        for &reference in references {
            loop {
                let moved = retry_transient("relocate activities", &self.config.retry, || async move {
                    with_timeout("relocate activities batch", budget, async move {
                        let mut tx = begin_monitored(pool, "merge::activities").await?;
                        let moved = activities::relocate_batch(tx.conn(), reference, from, to, batch_size).await?;
                        tx.commit().await?;
                        Ok(moved)
                    })
                    .await
                })
                .await?;

                total += moved;
                if moved < batch_size as u64 {
                    break;
                }
            }
        }

        let mut conn = self.pool.acquire().await?;
        merge_actions::update_step(&mut conn, &action.id, MergeStep::ActivitiesMoved).await?;

        info!(merge_action_id = %action.id, activities_moved = total, "Activities moved");
        Ok(())
    }

    async fn merge_attributes(&self, action: &MergeAction) -> Result<()> {
        let mut tx = begin_monitored(&self.pool, "merge::attributes").await?;
        let (primary_id, secondary_id) = (action.primary_id.as_str(), action.secondary_id.as_str());

        match action.entity {
            EntityKind::Member => {
                let primary = members::load_member(tx.conn(), primary_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Member not found: {}", primary_id)))?;
                let secondary = members::load_member(tx.conn(), secondary_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Member not found: {}", secondary_id)))?;

                let mut merged = merge_member_profile(&primary, &secondary);
                merged.updated_at = crowd_common::time::now();
                members::save_member(tx.conn(), &merged).await?;

                for link in [MemberLink::Tags, MemberLink::Tasks] {
                    let ids = members::load_links(tx.conn(), link, secondary_id).await?;
                    members::add_links(tx.conn(), link, primary_id, &ids).await?;
                }
            }
            EntityKind::Organization => {
                let primary = organizations::load_organization(tx.conn(), primary_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Organization not found: {}", primary_id)))?;
                let secondary = organizations::load_organization(tx.conn(), secondary_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Organization not found: {}", secondary_id)))?;

                let mut merged = merge_organization_profile(&primary, &secondary);
                merged.updated_at = crowd_common::time::now();
                organizations::save_organization(tx.conn(), &merged).await?;
            }
        }

        merge_actions::update_step(tx.conn(), &action.id, MergeStep::AttributesMerged).await?;
        tx.commit().await
    }

    async fn merge_roles(&self, action: &MergeAction, step: MergeStep) -> Result<()> {
        let mut tx = begin_monitored(&self.pool, "merge::roles").await?;
        let (primary_id, secondary_id) = (action.primary_id.as_str(), action.secondary_id.as_str());

        let (primary_roles, secondary_roles) = match action.entity {
            EntityKind::Member => (
                affiliations::roles_for_member(tx.conn(), primary_id).await?,
                affiliations::roles_for_member(tx.conn(), secondary_id).await?,
            ),
            EntityKind::Organization => (
                affiliations::roles_for_organization(tx.conn(), primary_id).await?,
                affiliations::roles_for_organization(tx.conn(), secondary_id).await?,
            ),
        };

        let plan = role_merger::plan_role_merge(action.entity, primary_id, &primary_roles, &secondary_roles);
        role_merger::apply_role_merge(tx.conn(), action.entity, primary_id, secondary_id, &plan).await?;
        merge_actions::update_step(tx.conn(), &action.id, step).await?;
        tx.commit().await
    }

    async fn finalize(&self, action: &MergeAction) -> Result<()> {
        let mut tx = begin_monitored(&self.pool, "merge::finalize").await?;
        match action.entity {
            EntityKind::Member => {
                members::set_merged_into(tx.conn(), &action.secondary_id, Some(&action.primary_id)).await?
            }
            EntityKind::Organization => {
                organizations::set_merged_into(tx.conn(), &action.secondary_id, Some(&action.primary_id))
                    .await?
            }
        }
        merge_actions::mark_done(tx.conn(), &action.id).await?;
        tx.commit().await
    }

    /// Store the failure on the action; the original error is what callers see
    async fn record_failure(&self, action: &MergeAction, completed: MergeStep, cause: &Error) {
        error!(
            merge_action_id = %action.id,
            step = completed.as_str(),
            error = %cause,
            "Merge failed"
        );

        let message = cause.to_string();
        let stored = async {
            let mut conn = self.pool.acquire().await?;
            merge_actions::mark_error(&mut conn, &action.id, &message).await
        };
        if let Err(e) = stored.await {
            error!(merge_action_id = %action.id, error = %e, "Could not record merge failure");
        }

        self.event_bus.emit_lossy(CrowdEvent::MergeFailed {
            merge_action_id: action.id.clone(),
            entity: action.entity,
            primary_id: action.primary_id.clone(),
            secondary_id: action.secondary_id.clone(),
            step: completed.as_str().to_string(),
            error: message,
            timestamp: crowd_common::time::now(),
        });
    }
}
