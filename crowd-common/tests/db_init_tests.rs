//! Tests for database creation, pragmas and schema

use crowd_common::db::init::init_database;
use sqlx::Row;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("entities.db");

    let pool = init_database(&db_path).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("entities.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO members (id, display_name, created_at, updated_at) VALUES ('m1', 'Ann', 'x', 'x')",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1, "Existing rows must survive re-initialization");
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("entities.db")).await.unwrap();

    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(&pool)
        .await
        .unwrap();
    let tables: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();

    for expected in [
        "members",
        "member_identities",
        "organizations",
        "organization_identities",
        "member_organizations",
        "member_segment_affiliations",
        "activities",
        "activity_relations",
        "member_tags",
        "member_tasks",
        "merge_actions",
    ] {
        assert!(tables.iter().any(|t| t == expected), "Missing table {}", expected);
    }
}

#[tokio::test]
async fn test_foreign_keys_and_wal_enabled() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("entities.db")).await.unwrap();

    let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.unwrap();
    assert_eq!(fk, 1);

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&pool).await.unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_in_progress_pair_is_unique() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("entities.db")).await.unwrap();

    let insert = |id: &'static str, state: &'static str| {
        let pool = pool.clone();
        async move {
            sqlx::query(
                r#"
                INSERT INTO merge_actions
                    (id, tenant_id, type, primary_id, secondary_id, pair_low, pair_high,
                     step, state, created_at, updated_at)
                VALUES (?, 't', 'member', 'a', 'b', 'a', 'b', 'merge-started', ?, 'x', 'x')
                "#,
            )
            .bind(id)
            .bind(state)
            .execute(&pool)
            .await
        }
    };

    insert("1", "in-progress").await.unwrap();
    // Finished actions for the same pair never collide
    insert("2", "done").await.unwrap();
    insert("3", "error").await.unwrap();

    let err = insert("4", "in-progress").await.unwrap_err();
    let db_err = err.as_database_error().expect("database error");
    assert!(db_err.is_unique_violation());
}
