//! Organization profile persistence

use crowd_common::time::{from_db, to_db};
use crowd_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use super::{parse_json, to_json};
use crate::models::Organization;

fn organization_from_row(row: &SqliteRow) -> Result<Organization> {
    let attributes: String = row.try_get("attributes")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Organization {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        attributes: parse_json(&attributes, "organizations.attributes")?,
        manually_created: row.try_get("manually_created")?,
        member_count_estimate: row.try_get("member_count_estimate")?,
        activity_count_estimate: row.try_get("activity_count_estimate")?,
        merged_into: row.try_get("merged_into")?,
        created_at: from_db(&created_at)?,
        updated_at: from_db(&updated_at)?,
    })
}

pub async fn load_organization(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Organization>> {
    let row = sqlx::query(
        r#"
        SELECT id, display_name, attributes, manually_created, member_count_estimate,
               activity_count_estimate, merged_into, created_at, updated_at
        FROM organizations
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(organization_from_row).transpose()
}

/// Insert or overwrite every profile field
pub async fn save_organization(conn: &mut SqliteConnection, org: &Organization) -> Result<()> {
    let attributes = to_json(&org.attributes)?;

    sqlx::query(
        r#"
        INSERT INTO organizations (
            id, display_name, attributes, manually_created, member_count_estimate,
            activity_count_estimate, merged_into, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            display_name = excluded.display_name,
            attributes = excluded.attributes,
            manually_created = excluded.manually_created,
            member_count_estimate = excluded.member_count_estimate,
            activity_count_estimate = excluded.activity_count_estimate,
            merged_into = excluded.merged_into,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&org.id)
    .bind(&org.display_name)
    .bind(&attributes)
    .bind(org.manually_created)
    .bind(org.member_count_estimate)
    .bind(org.activity_count_estimate)
    .bind(&org.merged_into)
    .bind(to_db(&org.created_at))
    .bind(to_db(&org.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn set_merged_into(
    conn: &mut SqliteConnection,
    id: &str,
    merged_into: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE organizations SET merged_into = ?, updated_at = ? WHERE id = ?")
        .bind(merged_into)
        .bind(to_db(&crowd_common::time::now()))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Stored member count estimate; `None` when unknown or the organization is missing
pub async fn member_count_estimate(conn: &mut SqliteConnection, id: &str) -> Result<Option<i64>> {
    let estimate: Option<Option<i64>> =
        sqlx::query_scalar("SELECT member_count_estimate FROM organizations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(estimate.flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowd_common::db::init_database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_organization_round_trip_and_estimate() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("t.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut org = Organization::new("Acme");
        org.member_count_estimate = Some(250);
        save_organization(&mut conn, &org).await.unwrap();

        let loaded = load_organization(&mut conn, &org.id).await.unwrap().unwrap();
        assert_eq!(loaded.display_name, "Acme");
        assert_eq!(member_count_estimate(&mut conn, &org.id).await.unwrap(), Some(250));
        assert_eq!(member_count_estimate(&mut conn, "nope").await.unwrap(), None);

        set_merged_into(&mut conn, &org.id, Some("other")).await.unwrap();
        let loaded = load_organization(&mut conn, &org.id).await.unwrap().unwrap();
        assert!(loaded.is_merged_away());
    }
}
