//! Activity and activity-relation persistence
//!
//! Every statement that repoints an activity repoints its relation row in the same
//! call, so callers only need to keep both inside one transaction.

use crowd_common::time::{from_db, to_db};
use crowd_common::Result;
use sqlx::{Row, SqliteConnection};

use crate::models::{Activity, ActivityStamp};

/// Column an activity references an entity through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityReference {
    /// Author of the activity
    Member,
    /// Member the activity was directed at
    ObjectMember,
    Organization,
}

impl ActivityReference {
    /// Same column name in `activities` and `activity_relations`
    fn column(self) -> &'static str {
        match self {
            ActivityReference::Member => "member_id",
            ActivityReference::ObjectMember => "object_member_id",
            ActivityReference::Organization => "organization_id",
        }
    }
}

/// Insert an activity together with its relation row
pub async fn insert_activity(conn: &mut SqliteConnection, activity: &Activity) -> Result<()> {
    let timestamp = to_db(&activity.timestamp);

    sqlx::query(
        r#"
        INSERT INTO activities (
            id, member_id, organization_id, segment_id, platform, username,
            object_member_id, object_member_username, timestamp, type, source_id,
            sentiment, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&activity.id)
    .bind(&activity.member_id)
    .bind(&activity.organization_id)
    .bind(&activity.segment_id)
    .bind(&activity.platform)
    .bind(&activity.username)
    .bind(&activity.object_member_id)
    .bind(&activity.object_member_username)
    .bind(&timestamp)
    .bind(&activity.activity_type)
    .bind(&activity.source_id)
    .bind(activity.sentiment)
    .bind(to_db(&activity.created_at))
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO activity_relations (
            activity_id, member_id, organization_id, object_member_id, segment_id,
            platform, username, timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&activity.id)
    .bind(&activity.member_id)
    .bind(&activity.organization_id)
    .bind(&activity.object_member_id)
    .bind(&activity.segment_id)
    .bind(&activity.platform)
    .bind(&activity.username)
    .bind(&timestamp)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Repoint up to `limit` activities (and relations) from `from_id` to `to_id`.
///
/// Returns how many activities moved; zero means nothing references `from_id`
/// any more. Only the reference column changes.
pub async fn relocate_batch(
    conn: &mut SqliteConnection,
    reference: ActivityReference,
    from_id: &str,
    to_id: &str,
    limit: usize,
) -> Result<u64> {
    let column = reference.column();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    // Relations first: the activity subquery must still see `from_id`
    let relations_sql = format!(
        "UPDATE activity_relations SET {column} = ? WHERE activity_id IN \
         (SELECT id FROM activities WHERE {column} = ? ORDER BY id LIMIT ?)"
    );
    sqlx::query(&relations_sql)
        .bind(to_id)
        .bind(from_id)
        .bind(limit)
        .execute(&mut *conn)
        .await?;

    let activities_sql = format!(
        "UPDATE activities SET {column} = ? WHERE id IN \
         (SELECT id FROM activities WHERE {column} = ? ORDER BY id LIMIT ?)"
    );
    let result = sqlx::query(&activities_sql)
        .bind(to_id)
        .bind(from_id)
        .bind(limit)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Move authored activities with a given (platform, username) between members
pub async fn move_member_activities_by_username(
    conn: &mut SqliteConnection,
    from_member: &str,
    to_member: &str,
    platform: &str,
    username: &str,
) -> Result<u64> {
    sqlx::query(
        r#"
        UPDATE activity_relations SET member_id = ?
        WHERE activity_id IN (
            SELECT id FROM activities WHERE member_id = ? AND platform = ? AND username = ?
        )
        "#,
    )
    .bind(to_member)
    .bind(from_member)
    .bind(platform)
    .bind(username)
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        "UPDATE activities SET member_id = ? WHERE member_id = ? AND platform = ? AND username = ?",
    )
    .bind(to_member)
    .bind(from_member)
    .bind(platform)
    .bind(username)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Move object-member references whose object username matches
pub async fn move_object_member_by_username(
    conn: &mut SqliteConnection,
    from_member: &str,
    to_member: &str,
    platform: &str,
    username: &str,
) -> Result<u64> {
    sqlx::query(
        r#"
        UPDATE activity_relations SET object_member_id = ?
        WHERE activity_id IN (
            SELECT id FROM activities
            WHERE object_member_id = ? AND platform = ? AND object_member_username = ?
        )
        "#,
    )
    .bind(to_member)
    .bind(from_member)
    .bind(platform)
    .bind(username)
    .execute(&mut *conn)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE activities SET object_member_id = ?
        WHERE object_member_id = ? AND platform = ? AND object_member_username = ?
        "#,
    )
    .bind(to_member)
    .bind(from_member)
    .bind(platform)
    .bind(username)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn stamp_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ActivityStamp> {
    let timestamp: String = row.try_get("timestamp")?;
    Ok(ActivityStamp {
        id: row.try_get("id")?,
        member_id: row.try_get("member_id")?,
        segment_id: row.try_get("segment_id")?,
        organization_id: row.try_get("organization_id")?,
        timestamp: from_db(&timestamp)?,
    })
}

/// Page through a member's activities in id order (keyset pagination)
pub async fn member_stamps_page(
    conn: &mut SqliteConnection,
    member_id: &str,
    after_id: Option<&str>,
    limit: usize,
) -> Result<Vec<ActivityStamp>> {
    let rows = sqlx::query(
        r#"
        SELECT id, member_id, segment_id, organization_id, timestamp
        FROM activities
        WHERE member_id = ? AND id > ?
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(member_id)
    .bind(after_id.unwrap_or(""))
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(stamp_from_row).collect()
}

/// Activities of `member_id` currently stamped with `organization_id`
pub async fn member_stamps_at_organization(
    conn: &mut SqliteConnection,
    organization_id: &str,
    member_id: &str,
) -> Result<Vec<ActivityStamp>> {
    let rows = sqlx::query(
        r#"
        SELECT id, member_id, segment_id, organization_id, timestamp
        FROM activities
        WHERE organization_id = ? AND member_id = ?
        ORDER BY id
        "#,
    )
    .bind(organization_id)
    .bind(member_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(stamp_from_row).collect()
}

/// Restamp one activity (and its relation) with an organization
pub async fn set_activity_organization(
    conn: &mut SqliteConnection,
    activity_id: &str,
    organization_id: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE activity_relations SET organization_id = ? WHERE activity_id = ?")
        .bind(organization_id)
        .bind(activity_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE activities SET organization_id = ? WHERE id = ?")
        .bind(organization_id)
        .bind(activity_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Number of activities referencing `id` through `reference`
pub async fn count_referencing(
    conn: &mut SqliteConnection,
    reference: ActivityReference,
    id: &str,
) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM activities WHERE {} = ?", reference.column());
    let count: i64 = sqlx::query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
    Ok(count)
}

/// Relation rows that disagree with their activity on any denormalized column
pub async fn count_inconsistent_relations(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM activities a
        JOIN activity_relations r ON r.activity_id = a.id
        WHERE r.member_id IS NOT a.member_id
           OR r.organization_id IS NOT a.organization_id
           OR r.object_member_id IS NOT a.object_member_id
           OR r.platform IS NOT a.platform
           OR r.username IS NOT a.username
           OR r.timestamp IS NOT a.timestamp
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Load a single activity (tests and diagnostics)
pub async fn load_activity(conn: &mut SqliteConnection, id: &str) -> Result<Option<Activity>> {
    let row = sqlx::query(
        r#"
        SELECT id, member_id, organization_id, segment_id, platform, username,
               object_member_id, object_member_username, timestamp, type, source_id,
               sentiment, created_at
        FROM activities
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let timestamp: String = row.try_get("timestamp")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(Some(Activity {
        id: row.try_get("id")?,
        member_id: row.try_get("member_id")?,
        organization_id: row.try_get("organization_id")?,
        segment_id: row.try_get("segment_id")?,
        platform: row.try_get("platform")?,
        username: row.try_get("username")?,
        object_member_id: row.try_get("object_member_id")?,
        object_member_username: row.try_get("object_member_username")?,
        timestamp: from_db(&timestamp)?,
        activity_type: row.try_get("type")?,
        source_id: row.try_get("source_id")?,
        sentiment: row.try_get("sentiment")?,
        created_at: from_db(&created_at)?,
    }))
}
