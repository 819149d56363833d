//! Test Helper Utilities
//!
//! Shared setup for crowd-entities integration tests: a temporary database, the
//! full application state, and seeding shortcuts.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use crowd_common::config::{RetryPolicy, ServiceConfig};
use crowd_common::events::{EntityKind, EventBus};
use crowd_entities::db::{activities, affiliations, identities, members, organizations};
use crowd_entities::models::{Activity, Identity, Member, MemberOrganization, Organization};
use crowd_entities::AppState;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Temporary database plus application state
///
/// `_dir` must stay alive for the duration of the test.
pub struct TestEnv {
    pub _dir: TempDir,
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub state: AppState,
}

/// Config tuned for tests: tiny batches so relocation really loops, fast retries
pub fn test_config(dir: &TempDir) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.database_path = dir.path().join("test_crowd.db");
    config.merge.batch_size = 2;
    config.merge.retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    };
    config.affiliation.restamp_batch_size = 3;
    config
}

pub async fn test_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let pool = crowd_entities::db::init_database_pool(&config.database_path)
        .await
        .unwrap();
    let event_bus = EventBus::new(100);
    let state = AppState::new(pool.clone(), event_bus.clone(), config);

    TestEnv {
        _dir: dir,
        pool,
        event_bus,
        state,
    }
}

pub fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Member with github username identities
pub async fn seed_member(pool: &SqlitePool, name: &str, usernames: &[&str]) -> Member {
    let mut conn = pool.acquire().await.unwrap();
    let member = Member::new(name);
    members::save_member(&mut conn, &member).await.unwrap();
    for username in usernames {
        identities::save_identity(&mut conn, EntityKind::Member, &member.id, &Identity::username("github", username))
            .await
            .unwrap();
    }
    member
}

pub async fn seed_organization(pool: &SqlitePool, name: &str, member_count: Option<i64>) -> Organization {
    let mut conn = pool.acquire().await.unwrap();
    let mut org = Organization::new(name);
    org.member_count_estimate = member_count;
    organizations::save_organization(&mut conn, &org).await.unwrap();
    org
}

pub async fn seed_role(pool: &SqlitePool, role: &MemberOrganization) {
    let mut conn = pool.acquire().await.unwrap();
    affiliations::save_role(&mut conn, role).await.unwrap();
}

/// Github activity authored by `member` as `username`
pub async fn seed_activity(
    pool: &SqlitePool,
    member: &Member,
    username: &str,
    segment_id: &str,
    timestamp: DateTime<Utc>,
    organization_id: Option<&str>,
) -> Activity {
    let mut conn = pool.acquire().await.unwrap();
    let mut activity = Activity::new(&member.id, segment_id, "github", username, timestamp);
    activity.organization_id = organization_id.map(str::to_string);
    activities::insert_activity(&mut conn, &activity).await.unwrap();
    activity
}

pub async fn activity_owner(pool: &SqlitePool, activity_id: &str) -> (String, Option<String>) {
    let mut conn = pool.acquire().await.unwrap();
    let activity = activities::load_activity(&mut conn, activity_id).await.unwrap().unwrap();
    (activity.member_id, activity.organization_id)
}

pub async fn identity_values(pool: &SqlitePool, kind: EntityKind, owner_id: &str) -> Vec<String> {
    let mut conn = pool.acquire().await.unwrap();
    identities::load_identities(&mut conn, kind, owner_id)
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.value)
        .collect()
}

pub async fn inconsistent_relations(pool: &SqlitePool) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    activities::count_inconsistent_relations(&mut conn).await.unwrap()
}
