//! Affiliation repository
//!
//! Reads and writes work experience (`member_organizations`) and manual segment
//! overrides (`member_segment_affiliations`). The resolver only ever reads
//! through [`load_records`].

use crowd_common::time::{from_db, from_db_opt, to_db, to_db_opt};
use crowd_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::models::{AffiliationRecords, MemberOrganization, SegmentAffiliation};

const ROLE_COLUMNS: &str = "id, member_id, organization_id, title, date_start, date_end, source, \
                            is_primary_organization, allow_affiliation, created_at";

const OVERRIDE_COLUMNS: &str = "id, member_id, segment_id, organization_id, date_start, date_end";

fn role_from_row(row: &SqliteRow) -> Result<MemberOrganization> {
    let date_start: Option<String> = row.try_get("date_start")?;
    let date_end: Option<String> = row.try_get("date_end")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(MemberOrganization {
        id: row.try_get("id")?,
        member_id: row.try_get("member_id")?,
        organization_id: row.try_get("organization_id")?,
        title: row.try_get("title")?,
        date_start: from_db_opt(date_start.as_deref())?,
        date_end: from_db_opt(date_end.as_deref())?,
        source: row.try_get("source")?,
        is_primary_organization: row.try_get("is_primary_organization")?,
        allow_affiliation: row.try_get("allow_affiliation")?,
        created_at: from_db(&created_at)?,
    })
}

fn override_from_row(row: &SqliteRow) -> Result<SegmentAffiliation> {
    let date_start: Option<String> = row.try_get("date_start")?;
    let date_end: Option<String> = row.try_get("date_end")?;

    Ok(SegmentAffiliation {
        id: row.try_get("id")?,
        member_id: row.try_get("member_id")?,
        segment_id: row.try_get("segment_id")?,
        organization_id: row.try_get("organization_id")?,
        date_start: from_db_opt(date_start.as_deref())?,
        date_end: from_db_opt(date_end.as_deref())?,
    })
}

/// Roles of one member, in deterministic order (start desc, created_at, id)
pub async fn roles_for_member(
    conn: &mut SqliteConnection,
    member_id: &str,
) -> Result<Vec<MemberOrganization>> {
    let sql = format!(
        "SELECT {ROLE_COLUMNS} FROM member_organizations WHERE member_id = ? \
         ORDER BY date_start DESC, created_at, id"
    );
    let rows = sqlx::query(&sql).bind(member_id).fetch_all(&mut *conn).await?;
    rows.iter().map(role_from_row).collect()
}

/// Roles of any member at one organization
pub async fn roles_for_organization(
    conn: &mut SqliteConnection,
    organization_id: &str,
) -> Result<Vec<MemberOrganization>> {
    let sql = format!(
        "SELECT {ROLE_COLUMNS} FROM member_organizations WHERE organization_id = ? \
         ORDER BY member_id, date_start DESC, created_at, id"
    );
    let rows = sqlx::query(&sql).bind(organization_id).fetch_all(&mut *conn).await?;
    rows.iter().map(role_from_row).collect()
}

/// Manual overrides of one member across all segments
pub async fn overrides_for_member(
    conn: &mut SqliteConnection,
    member_id: &str,
) -> Result<Vec<SegmentAffiliation>> {
    let sql = format!(
        "SELECT {OVERRIDE_COLUMNS} FROM member_segment_affiliations WHERE member_id = ? \
         ORDER BY segment_id, date_start DESC, id"
    );
    let rows = sqlx::query(&sql).bind(member_id).fetch_all(&mut *conn).await?;
    rows.iter().map(override_from_row).collect()
}

/// Manual overrides pointing at one organization
pub async fn overrides_for_organization(
    conn: &mut SqliteConnection,
    organization_id: &str,
) -> Result<Vec<SegmentAffiliation>> {
    let sql = format!(
        "SELECT {OVERRIDE_COLUMNS} FROM member_segment_affiliations WHERE organization_id = ? \
         ORDER BY member_id, segment_id, id"
    );
    let rows = sqlx::query(&sql).bind(organization_id).fetch_all(&mut *conn).await?;
    rows.iter().map(override_from_row).collect()
}

/// Everything the resolver needs for one member
pub async fn load_records(conn: &mut SqliteConnection, member_id: &str) -> Result<AffiliationRecords> {
    Ok(AffiliationRecords {
        roles: roles_for_member(conn, member_id).await?,
        overrides: overrides_for_member(conn, member_id).await?,
    })
}

/// Insert or overwrite a role by id
pub async fn save_role(conn: &mut SqliteConnection, role: &MemberOrganization) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO member_organizations (
            id, member_id, organization_id, title, date_start, date_end, source,
            is_primary_organization, allow_affiliation, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            member_id = excluded.member_id,
            organization_id = excluded.organization_id,
            title = excluded.title,
            date_start = excluded.date_start,
            date_end = excluded.date_end,
            source = excluded.source,
            is_primary_organization = excluded.is_primary_organization,
            allow_affiliation = excluded.allow_affiliation
        "#,
    )
    .bind(&role.id)
    .bind(&role.member_id)
    .bind(&role.organization_id)
    .bind(&role.title)
    .bind(to_db_opt(role.date_start.as_ref()))
    .bind(to_db_opt(role.date_end.as_ref()))
    .bind(&role.source)
    .bind(role.is_primary_organization)
    .bind(role.allow_affiliation)
    .bind(to_db(&role.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_role(conn: &mut SqliteConnection, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM member_organizations WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Make the member's roles exactly `roles`
pub async fn replace_member_roles(
    conn: &mut SqliteConnection,
    member_id: &str,
    roles: &[MemberOrganization],
) -> Result<()> {
    sqlx::query("DELETE FROM member_organizations WHERE member_id = ?")
        .bind(member_id)
        .execute(&mut *conn)
        .await?;
    for role in roles {
        save_role(conn, role).await?;
    }
    Ok(())
}

/// Make the roles held at an organization exactly `roles`
pub async fn replace_organization_roles(
    conn: &mut SqliteConnection,
    organization_id: &str,
    roles: &[MemberOrganization],
) -> Result<()> {
    sqlx::query("DELETE FROM member_organizations WHERE organization_id = ?")
        .bind(organization_id)
        .execute(&mut *conn)
        .await?;
    for role in roles {
        save_role(conn, role).await?;
    }
    Ok(())
}

/// Insert or overwrite an override by id
pub async fn save_override(conn: &mut SqliteConnection, ov: &SegmentAffiliation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO member_segment_affiliations (
            id, member_id, segment_id, organization_id, date_start, date_end
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            member_id = excluded.member_id,
            segment_id = excluded.segment_id,
            organization_id = excluded.organization_id,
            date_start = excluded.date_start,
            date_end = excluded.date_end
        "#,
    )
    .bind(&ov.id)
    .bind(&ov.member_id)
    .bind(&ov.segment_id)
    .bind(&ov.organization_id)
    .bind(to_db_opt(ov.date_start.as_ref()))
    .bind(to_db_opt(ov.date_end.as_ref()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Make the member's overrides exactly `overrides`
pub async fn replace_member_overrides(
    conn: &mut SqliteConnection,
    member_id: &str,
    overrides: &[SegmentAffiliation],
) -> Result<()> {
    sqlx::query("DELETE FROM member_segment_affiliations WHERE member_id = ?")
        .bind(member_id)
        .execute(&mut *conn)
        .await?;
    for ov in overrides {
        save_override(conn, ov).await?;
    }
    Ok(())
}

/// Point every override of `from_member` at `to_member`
pub async fn reparent_member_overrides(
    conn: &mut SqliteConnection,
    from_member: &str,
    to_member: &str,
) -> Result<u64> {
    let result = sqlx::query("UPDATE member_segment_affiliations SET member_id = ? WHERE member_id = ?")
        .bind(to_member)
        .bind(from_member)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Point every override naming `from_org` at `to_org`
pub async fn reparent_organization_overrides(
    conn: &mut SqliteConnection,
    from_org: &str,
    to_org: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE member_segment_affiliations SET organization_id = ? WHERE organization_id = ?",
    )
    .bind(to_org)
    .bind(from_org)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{members::save_member, organizations::save_organization};
    use crate::models::{Member, Organization};
    use chrono::{TimeZone, Utc};
    use crowd_common::db::init_database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_round_trip_and_order() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("t.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let member = Member::new("Ann");
        let org = Organization::new("Acme");
        save_member(&mut conn, &member).await.unwrap();
        save_organization(&mut conn, &org).await.unwrap();

        let older = MemberOrganization::new(&member.id, &org.id)
            .with_dates(Some(Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap()), None);
        let newer = MemberOrganization::new(&member.id, &org.id)
            .with_dates(Some(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()), None)
            .with_title("Engineer");
        save_role(&mut conn, &older).await.unwrap();
        save_role(&mut conn, &newer).await.unwrap();

        let pinned = SegmentAffiliation::new(&member.id, "seg", None);
        save_override(&mut conn, &pinned).await.unwrap();

        let records = load_records(&mut conn, &member.id).await.unwrap();
        let ids: Vec<&str> = records.roles.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
        assert_eq!(records.roles[0].title.as_deref(), Some("Engineer"));
        assert_eq!(records.overrides, vec![pinned]);

        let at_org = roles_for_organization(&mut conn, &org.id).await.unwrap();
        assert_eq!(at_org.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_and_reparent_overrides() {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("t.db")).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let a = Member::new("A");
        let b = Member::new("B");
        let org = Organization::new("Acme");
        save_member(&mut conn, &a).await.unwrap();
        save_member(&mut conn, &b).await.unwrap();
        save_organization(&mut conn, &org).await.unwrap();

        save_override(&mut conn, &SegmentAffiliation::new(&a.id, "s1", Some(&org.id))).await.unwrap();
        let replacement = vec![SegmentAffiliation::new(&a.id, "s2", None)];
        replace_member_overrides(&mut conn, &a.id, &replacement).await.unwrap();
        assert_eq!(overrides_for_member(&mut conn, &a.id).await.unwrap(), replacement);

        assert_eq!(reparent_member_overrides(&mut conn, &a.id, &b.id).await.unwrap(), 1);
        assert!(overrides_for_member(&mut conn, &a.id).await.unwrap().is_empty());
        assert_eq!(overrides_for_member(&mut conn, &b.id).await.unwrap().len(), 1);
    }
}
