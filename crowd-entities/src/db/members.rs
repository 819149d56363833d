//! Member profile, tag and task persistence

use crowd_common::time::{from_db, from_db_opt, to_db, to_db_opt};
use crowd_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::{parse_json, to_json};
use crate::models::Member;

fn member_from_row(row: &SqliteRow) -> Result<Member> {
    let attributes: String = row.try_get("attributes")?;
    let manually_changed_fields: String = row.try_get("manually_changed_fields")?;
    let reach: String = row.try_get("reach")?;
    let contributions: Option<String> = row.try_get("contributions")?;
    let joined_at: Option<String> = row.try_get("joined_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Member {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        joined_at: from_db_opt(joined_at.as_deref())?,
        attributes: parse_json(&attributes, "members.attributes")?,
        manually_created: row.try_get("manually_created")?,
        manually_changed_fields: parse_json(&manually_changed_fields, "members.manually_changed_fields")?,
        reach: parse_json(&reach, "members.reach")?,
        contributions: contributions
            .map(|raw| parse_json(&raw, "members.contributions"))
            .transpose()?,
        merged_into: row.try_get("merged_into")?,
        created_at: from_db(&created_at)?,
        updated_at: from_db(&updated_at)?,
    })
}

pub async fn load_member(conn: &mut SqliteConnection, id: &str) -> Result<Option<Member>> {
    let row = sqlx::query(
        r#"
        SELECT id, display_name, joined_at, attributes, manually_created,
               manually_changed_fields, reach, contributions, merged_into,
               created_at, updated_at
        FROM members
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(member_from_row).transpose()
}

/// Insert or overwrite every profile field
pub async fn save_member(conn: &mut SqliteConnection, member: &Member) -> Result<()> {
    // Prepare all data before touching the connection
    let attributes = to_json(&member.attributes)?;
    let manually_changed_fields = to_json(&member.manually_changed_fields)?;
    let reach = to_json(&member.reach)?;
    let contributions = member.contributions.as_ref().map(to_json).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO members (
            id, display_name, joined_at, attributes, manually_created,
            manually_changed_fields, reach, contributions, merged_into,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            display_name = excluded.display_name,
            joined_at = excluded.joined_at,
            attributes = excluded.attributes,
            manually_created = excluded.manually_created,
            manually_changed_fields = excluded.manually_changed_fields,
            reach = excluded.reach,
            contributions = excluded.contributions,
            merged_into = excluded.merged_into,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&member.id)
    .bind(&member.display_name)
    .bind(to_db_opt(member.joined_at.as_ref()))
    .bind(&attributes)
    .bind(member.manually_created)
    .bind(&manually_changed_fields)
    .bind(&reach)
    .bind(&contributions)
    .bind(&member.merged_into)
    .bind(to_db(&member.created_at))
    .bind(to_db(&member.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_merged_into(
    conn: &mut SqliteConnection,
    id: &str,
    merged_into: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE members SET merged_into = ?, updated_at = ? WHERE id = ?")
        .bind(merged_into)
        .bind(to_db(&crowd_common::time::now()))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Tag or task link table
#[derive(Debug, Clone, Copy)]
pub enum MemberLink {
    Tags,
    Tasks,
}

impl MemberLink {
    fn table(self) -> &'static str {
        match self {
            MemberLink::Tags => "member_tags",
            MemberLink::Tasks => "member_tasks",
        }
    }

    fn column(self) -> &'static str {
        match self {
            MemberLink::Tags => "tag_id",
            MemberLink::Tasks => "task_id",
        }
    }
}

pub async fn load_links(
    conn: &mut SqliteConnection,
    link: MemberLink,
    member_id: &str,
) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT {col} FROM {table} WHERE member_id = ? ORDER BY {col}",
        col = link.column(),
        table = link.table()
    );
    let ids = sqlx::query_scalar::<_, String>(&sql)
        .bind(member_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

/// Add links, ignoring ones the member already has
pub async fn add_links(
    conn: &mut SqliteConnection,
    link: MemberLink,
    member_id: &str,
    ids: &[String],
) -> Result<()> {
    let sql = format!(
        "INSERT OR IGNORE INTO {table} (member_id, {col}) VALUES (?, ?)",
        col = link.column(),
        table = link.table()
    );
    for id in ids {
        sqlx::query(&sql)
            .bind(member_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Make the member's links exactly `ids`
pub async fn replace_links(
    conn: &mut SqliteConnection,
    link: MemberLink,
    member_id: &str,
    ids: &[String],
) -> Result<()> {
    let sql = format!("DELETE FROM {table} WHERE member_id = ?", table = link.table());
    sqlx::query(&sql).bind(member_id).execute(&mut *conn).await?;
    add_links(conn, link, member_id, ids).await
}
