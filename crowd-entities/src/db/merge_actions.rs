//! Merge action persistence
//!
//! State changes are conditional updates (`... WHERE state = ?`) so two callers
//! racing on the same action cannot both win.

use crowd_common::events::EntityKind;
use crowd_common::time::{from_db, to_db};
use crowd_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::models::merge_action::normalized_pair;
use crate::models::{MergeAction, MergeState, MergeStep};

const ACTION_COLUMNS: &str = "id, tenant_id, type, primary_id, secondary_id, step, state, \
                              unmerge_backup, last_error, action_by, created_at, updated_at";

fn parse_entity(value: &str) -> Result<EntityKind> {
    match value {
        "member" => Ok(EntityKind::Member),
        "org" => Ok(EntityKind::Organization),
        other => Err(Error::DataIntegrity(format!("Unknown merge type '{}'", other))),
    }
}

fn action_from_row(row: &SqliteRow) -> Result<MergeAction> {
    let entity: String = row.try_get("type")?;
    let step: String = row.try_get("step")?;
    let state: String = row.try_get("state")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(MergeAction {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        entity: parse_entity(&entity)?,
        primary_id: row.try_get("primary_id")?,
        secondary_id: row.try_get("secondary_id")?,
        step: MergeStep::parse(&step)?,
        state: MergeState::parse(&state)?,
        unmerge_backup: row.try_get("unmerge_backup")?,
        last_error: row.try_get("last_error")?,
        action_by: row.try_get("action_by")?,
        created_at: from_db(&created_at)?,
        updated_at: from_db(&updated_at)?,
    })
}

/// Insert a new action.
///
/// A second in-progress action for the same unordered pair violates the
/// partial unique index and surfaces as [`Error::Conflict`].
pub async fn insert_action(conn: &mut SqliteConnection, action: &MergeAction) -> Result<()> {
    let (pair_low, pair_high) = normalized_pair(&action.primary_id, &action.secondary_id);

    let result = sqlx::query(
        r#"
        INSERT INTO merge_actions (
            id, tenant_id, type, primary_id, secondary_id, pair_low, pair_high,
            step, state, unmerge_backup, last_error, action_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&action.id)
    .bind(&action.tenant_id)
    .bind(action.entity.as_str())
    .bind(&action.primary_id)
    .bind(&action.secondary_id)
    .bind(pair_low)
    .bind(pair_high)
    .bind(action.step.as_str())
    .bind(action.state.as_str())
    .bind(&action.unmerge_backup)
    .bind(&action.last_error)
    .bind(&action.action_by)
    .bind(to_db(&action.created_at))
    .bind(to_db(&action.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(Error::from);

    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_unique_violation() => Err(Error::Conflict(format!(
            "A merge between {} and {} is already in progress",
            action.primary_id, action.secondary_id
        ))),
        Err(e) => Err(e),
    }
}

pub async fn load_action(conn: &mut SqliteConnection, id: &str) -> Result<Option<MergeAction>> {
    let sql = format!("SELECT {ACTION_COLUMNS} FROM merge_actions WHERE id = ?");
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(action_from_row).transpose()
}

/// In-progress action for the unordered pair, in either direction
pub async fn find_in_progress_for_pair(
    conn: &mut SqliteConnection,
    entity: EntityKind,
    a: &str,
    b: &str,
) -> Result<Option<MergeAction>> {
    let (pair_low, pair_high) = normalized_pair(a, b);
    let sql = format!(
        "SELECT {ACTION_COLUMNS} FROM merge_actions \
         WHERE type = ? AND pair_low = ? AND pair_high = ? AND state = 'in-progress'"
    );
    let row = sqlx::query(&sql)
        .bind(entity.as_str())
        .bind(pair_low)
        .bind(pair_high)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(action_from_row).transpose()
}

/// Most recent action merging `secondary_id` into `primary_id` (this direction only)
pub async fn latest_for_pair(
    conn: &mut SqliteConnection,
    entity: Option<EntityKind>,
    primary_id: &str,
    secondary_id: &str,
) -> Result<Option<MergeAction>> {
    let sql = format!(
        "SELECT {ACTION_COLUMNS} FROM merge_actions \
         WHERE primary_id = ? AND secondary_id = ? AND (? IS NULL OR type = ?) \
         ORDER BY created_at DESC, rowid DESC LIMIT 1"
    );
    let entity = entity.map(|e| e.as_str());
    let row = sqlx::query(&sql)
        .bind(primary_id)
        .bind(secondary_id)
        .bind(entity)
        .bind(entity)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(action_from_row).transpose()
}

/// Record a completed step; only while the action is in progress
pub async fn update_step(conn: &mut SqliteConnection, id: &str, step: MergeStep) -> Result<()> {
    let result = sqlx::query(
        "UPDATE merge_actions SET step = ?, updated_at = ? WHERE id = ? AND state = 'in-progress'",
    )
    .bind(step.as_str())
    .bind(to_db(&crowd_common::time::now()))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!("Merge action {} is not in progress", id)));
    }
    Ok(())
}

/// Finish: state and step both `done`
pub async fn mark_done(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE merge_actions SET step = 'done', state = 'done', last_error = NULL, updated_at = ?
        WHERE id = ? AND state = 'in-progress'
        "#,
    )
    .bind(to_db(&crowd_common::time::now()))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!("Merge action {} is not in progress", id)));
    }
    Ok(())
}

/// Stop in ERROR keeping the last completed step
pub async fn mark_error(conn: &mut SqliteConnection, id: &str, message: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE merge_actions SET state = 'error', last_error = ?, updated_at = ?
        WHERE id = ? AND state = 'in-progress'
        "#,
    )
    .bind(message)
    .bind(to_db(&crowd_common::time::now()))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// ERROR → in-progress for a resume. `false` if the action was not in ERROR.
pub async fn reopen_if_error(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE merge_actions SET state = 'in-progress', last_error = NULL, updated_at = ?
        WHERE id = ? AND state = 'error'
        "#,
    )
    .bind(to_db(&crowd_common::time::now()))
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(Error::from);

    match result {
        Ok(r) => Ok(r.rows_affected() == 1),
        Err(e) if e.is_unique_violation() => Err(Error::Conflict(format!(
            "Another merge of the same pair is in progress; cannot resume {}",
            id
        ))),
        Err(e) => Err(e),
    }
}

/// done → unmerged. `false` if the action was not `done` any more.
pub async fn mark_unmerged_if_done(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE merge_actions SET state = 'unmerged', step = 'unmerged', updated_at = ?
        WHERE id = ? AND state = 'done'
        "#,
    )
    .bind(to_db(&crowd_common::time::now()))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
