//! Member and organization identity persistence
//!
//! Both identity tables share one shape; [`EntityKind`] picks the table.

use crowd_common::events::EntityKind;
use crowd_common::time::{from_db, to_db};
use crowd_common::Result;
use sqlx::{Row, SqliteConnection};

use crate::models::Identity;

fn table(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Member => ("member_identities", "member_id"),
        EntityKind::Organization => ("organization_identities", "organization_id"),
    }
}

/// What combining two identity sets did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityMergeOutcome {
    /// Secondary identities now owned by the primary
    pub moved: usize,
    /// Secondary copies of identities the primary already had
    pub dropped: usize,
    /// Primary identities upgraded to verified by their secondary copy
    pub verified: usize,
}

pub async fn load_identities(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    owner_id: &str,
) -> Result<Vec<Identity>> {
    let (table, owner) = table(kind);
    let sql = format!(
        "SELECT platform, type, value, verified, created_at FROM {table} \
         WHERE {owner} = ? ORDER BY platform, type, value"
    );
    let rows = sqlx::query(&sql).bind(owner_id).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| -> Result<Identity> {
            let created_at: String = row.try_get("created_at")?;
            Ok(Identity {
                platform: row.try_get("platform")?,
                identity_type: row.try_get("type")?,
                value: row.try_get("value")?,
                verified: row.try_get("verified")?,
                created_at: from_db(&created_at)?,
            })
        })
        .collect()
}

/// Insert, or update the verified flag of an existing identical identity
pub async fn save_identity(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    owner_id: &str,
    identity: &Identity,
) -> Result<()> {
    let (table, owner) = table(kind);
    let sql = format!(
        "INSERT INTO {table} ({owner}, platform, type, value, verified, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT({owner}, platform, type, value) DO UPDATE SET verified = excluded.verified"
    );
    sqlx::query(&sql)
        .bind(owner_id)
        .bind(&identity.platform)
        .bind(&identity.identity_type)
        .bind(&identity.value)
        .bind(identity.verified)
        .bind(to_db(&identity.created_at))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_identity(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    owner_id: &str,
    identity: &Identity,
) -> Result<()> {
    let (table, owner) = table(kind);
    let sql = format!(
        "DELETE FROM {table} WHERE {owner} = ? AND platform = ? AND type = ? AND value = ?"
    );
    sqlx::query(&sql)
        .bind(owner_id)
        .bind(&identity.platform)
        .bind(&identity.identity_type)
        .bind(&identity.value)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Make the owner's identities exactly `identities`
pub async fn replace_identities(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    owner_id: &str,
    identities: &[Identity],
) -> Result<()> {
    let (table, owner) = table(kind);
    let sql = format!("DELETE FROM {table} WHERE {owner} = ?");
    sqlx::query(&sql).bind(owner_id).execute(&mut *conn).await?;

    for identity in identities {
        save_identity(conn, kind, owner_id, identity).await?;
    }
    Ok(())
}

/// Move the secondary's identities to the primary without duplicating any.
///
/// When both own the same (platform, type, value) the secondary copy is
/// dropped; a verified secondary copy marks the primary's verified. A verified
/// primary identity is never downgraded. Re-running after completion is a no-op.
pub async fn merge_identities(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    primary_id: &str,
    secondary_id: &str,
) -> Result<IdentityMergeOutcome> {
    let primary = load_identities(conn, kind, primary_id).await?;
    let secondary = load_identities(conn, kind, secondary_id).await?;
    let (table, owner) = table(kind);

    let move_sql = format!(
        "UPDATE {table} SET {owner} = ? \
         WHERE {owner} = ? AND platform = ? AND type = ? AND value = ?"
    );

    let mut outcome = IdentityMergeOutcome::default();
    for identity in &secondary {
        match primary.iter().find(|p| p.same_key(identity)) {
            Some(existing) => {
                if identity.verified && !existing.verified {
                    let mut upgraded = existing.clone();
                    upgraded.verified = true;
                    save_identity(conn, kind, primary_id, &upgraded).await?;
                    outcome.verified += 1;
                }
                delete_identity(conn, kind, secondary_id, identity).await?;
                outcome.dropped += 1;
            }
            None => {
                sqlx::query(&move_sql)
                    .bind(primary_id)
                    .bind(secondary_id)
                    .bind(&identity.platform)
                    .bind(&identity.identity_type)
                    .bind(&identity.value)
                    .execute(&mut *conn)
                    .await?;
                outcome.moved += 1;
            }
        }
    }

    Ok(outcome)
}
