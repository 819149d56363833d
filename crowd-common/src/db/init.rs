//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates the schema.
//! Every statement is `IF NOT EXISTS`, so initialization is safe on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every connection
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets status readers proceed while a merge batch holds the write lock
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_members_table(pool).await?;
    create_member_identities_table(pool).await?;
    create_organizations_table(pool).await?;
    create_organization_identities_table(pool).await?;
    create_member_organizations_table(pool).await?;
    create_member_segment_affiliations_table(pool).await?;
    create_activities_table(pool).await?;
    create_activity_relations_table(pool).await?;
    create_member_tags_table(pool).await?;
    create_member_tasks_table(pool).await?;
    create_merge_actions_table(pool).await?;

    info!("Database schema ready");
    Ok(())
}

async fn create_members_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS members (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            joined_at TEXT,
            attributes TEXT NOT NULL DEFAULT '{}',
            manually_created INTEGER NOT NULL DEFAULT 0,
            manually_changed_fields TEXT NOT NULL DEFAULT '[]',
            reach TEXT NOT NULL DEFAULT '{}',
            contributions TEXT,
            merged_into TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_member_identities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS member_identities (
            member_id TEXT NOT NULL REFERENCES members(id),
            platform TEXT NOT NULL,
            type TEXT NOT NULL,
            value TEXT NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (member_id, platform, type, value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_member_identities_lookup ON member_identities(platform, type, value)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_organizations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{}',
            manually_created INTEGER NOT NULL DEFAULT 0,
            member_count_estimate INTEGER,
            activity_count_estimate INTEGER,
            merged_into TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_organization_identities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organization_identities (
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            platform TEXT NOT NULL,
            type TEXT NOT NULL,
            value TEXT NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            PRIMARY KEY (organization_id, platform, type, value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_member_organizations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS member_organizations (
            id TEXT PRIMARY KEY,
            member_id TEXT NOT NULL REFERENCES members(id),
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            title TEXT,
            date_start TEXT,
            date_end TEXT,
            source TEXT,
            is_primary_organization INTEGER NOT NULL DEFAULT 0,
            allow_affiliation INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_member_organizations_member ON member_organizations(member_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_member_organizations_org ON member_organizations(organization_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_member_segment_affiliations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS member_segment_affiliations (
            id TEXT PRIMARY KEY,
            member_id TEXT NOT NULL REFERENCES members(id),
            segment_id TEXT NOT NULL,
            organization_id TEXT REFERENCES organizations(id),
            date_start TEXT,
            date_end TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_member_segment_affiliations_member ON member_segment_affiliations(member_id, segment_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_activities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            member_id TEXT NOT NULL,
            organization_id TEXT,
            segment_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            username TEXT NOT NULL,
            object_member_id TEXT,
            object_member_username TEXT,
            timestamp TEXT NOT NULL,
            type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            sentiment REAL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_activities_member ON activities(member_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_activities_org ON activities(organization_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_activities_object_member ON activities(object_member_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_activity_relations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activity_relations (
            activity_id TEXT PRIMARY KEY REFERENCES activities(id),
            member_id TEXT NOT NULL,
            organization_id TEXT,
            object_member_id TEXT,
            segment_id TEXT NOT NULL,
            platform TEXT NOT NULL,
            username TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_activity_relations_member ON activity_relations(member_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_activity_relations_org ON activity_relations(organization_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_member_tags_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS member_tags (
            member_id TEXT NOT NULL REFERENCES members(id),
            tag_id TEXT NOT NULL,
            PRIMARY KEY (member_id, tag_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_member_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS member_tasks (
            member_id TEXT NOT NULL REFERENCES members(id),
            task_id TEXT NOT NULL,
            PRIMARY KEY (member_id, task_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge action log
///
/// `pair_low`/`pair_high` hold the unordered pair so the partial unique index
/// rejects a second IN_PROGRESS merge of the same two entities in either direction.
async fn create_merge_actions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merge_actions (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            type TEXT NOT NULL,
            primary_id TEXT NOT NULL,
            secondary_id TEXT NOT NULL,
            pair_low TEXT NOT NULL,
            pair_high TEXT NOT NULL,
            step TEXT NOT NULL,
            state TEXT NOT NULL,
            unmerge_backup TEXT,
            last_error TEXT,
            action_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_merge_actions_in_progress_pair
        ON merge_actions(type, pair_low, pair_high)
        WHERE state = 'in-progress'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_merge_actions_pair ON merge_actions(primary_id, secondary_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
