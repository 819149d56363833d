//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok" or "degraded")
    pub status: String,
    /// Module name ("crowd-entities")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Short git hash stamped at build time
    pub build: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Whether a trivial query succeeds
    pub database: bool,
    /// Live event subscribers (search sync, audit log)
    pub event_subscribers: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let database = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" }.to_string(),
        module: "crowd-entities".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: env!("CROWD_GIT_HASH").to_string(),
        uptime_seconds,
        database,
        event_subscribers: state.event_bus.subscriber_count(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
