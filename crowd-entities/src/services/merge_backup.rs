//! Snapshot and restore of merge participants
//!
//! Snapshots are taken inside the transaction that creates the merge action, so the
//! backup always describes the entities exactly as they were before any step ran.
//! Restores overwrite current state with a snapshot; activities are not part of a
//! snapshot and are split separately by the unmerge service.

use crowd_common::events::EntityKind;
use crowd_common::{Error, Result};
use sqlx::SqliteConnection;

use crate::db::members::{self, MemberLink};
use crate::db::{affiliations, identities, organizations};
use crate::models::{MemberSnapshot, MergeBackup, OrganizationSnapshot};

pub async fn snapshot_member(conn: &mut SqliteConnection, member_id: &str) -> Result<MemberSnapshot> {
    let member = members::load_member(conn, member_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Member not found: {}", member_id)))?;

    Ok(MemberSnapshot {
        member,
        identities: identities::load_identities(conn, EntityKind::Member, member_id).await?,
        roles: affiliations::roles_for_member(conn, member_id).await?,
        segment_affiliations: affiliations::overrides_for_member(conn, member_id).await?,
        tags: members::load_links(conn, MemberLink::Tags, member_id).await?,
        tasks: members::load_links(conn, MemberLink::Tasks, member_id).await?,
    })
}

pub async fn snapshot_organization(
    conn: &mut SqliteConnection,
    organization_id: &str,
) -> Result<OrganizationSnapshot> {
    let organization = organizations::load_organization(conn, organization_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Organization not found: {}", organization_id)))?;

    Ok(OrganizationSnapshot {
        organization,
        identities: identities::load_identities(conn, EntityKind::Organization, organization_id).await?,
        roles: affiliations::roles_for_organization(conn, organization_id).await?,
        segment_affiliations: affiliations::overrides_for_organization(conn, organization_id).await?,
    })
}

/// Backup of both sides of a merge
pub async fn snapshot_pair(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    primary_id: &str,
    secondary_id: &str,
) -> Result<MergeBackup> {
    Ok(match entity {
        EntityKind::Member => MergeBackup::members(
            snapshot_member(conn, primary_id).await?,
            snapshot_member(conn, secondary_id).await?,
        ),
        EntityKind::Organization => MergeBackup::organizations(
            snapshot_organization(conn, primary_id).await?,
            snapshot_organization(conn, secondary_id).await?,
        ),
    })
}

/// Put both members back to their snapshots.
///
/// The primary goes first: replacing its roles and overrides removes the ones it
/// took over, and the secondary's replace recreates them under their original ids.
pub async fn restore_members(
    conn: &mut SqliteConnection,
    primary: &MemberSnapshot,
    secondary: &MemberSnapshot,
) -> Result<()> {
    for snapshot in [primary, secondary] {
        let id = snapshot.id();
        let mut member = snapshot.member.clone();
        member.merged_into = None;
        member.updated_at = crowd_common::time::now();
        members::save_member(conn, &member).await?;

        identities::replace_identities(conn, EntityKind::Member, id, &snapshot.identities).await?;
        affiliations::replace_member_roles(conn, id, &snapshot.roles).await?;
        affiliations::replace_member_overrides(conn, id, &snapshot.segment_affiliations).await?;
        members::replace_links(conn, MemberLink::Tags, id, &snapshot.tags).await?;
        members::replace_links(conn, MemberLink::Tasks, id, &snapshot.tasks).await?;
    }
    Ok(())
}

/// Put both organizations back to their snapshots
pub async fn restore_organizations(
    conn: &mut SqliteConnection,
    primary: &OrganizationSnapshot,
    secondary: &OrganizationSnapshot,
) -> Result<()> {
    for snapshot in [primary, secondary] {
        let id = snapshot.id();
        let mut organization = snapshot.organization.clone();
        organization.merged_into = None;
        organization.updated_at = crowd_common::time::now();
        organizations::save_organization(conn, &organization).await?;

        identities::replace_identities(conn, EntityKind::Organization, id, &snapshot.identities).await?;
        affiliations::replace_organization_roles(conn, id, &snapshot.roles).await?;
        // Overrides belong to members; upsert by id points them back
        for ov in &snapshot.segment_affiliations {
            affiliations::save_override(conn, ov).await?;
        }
    }
    Ok(())
}
