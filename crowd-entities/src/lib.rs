//! crowd-entities library interface
//!
//! Affiliation resolution plus merge/unmerge orchestration for members and
//! organizations. Exposes public APIs for integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use crowd_common::config::ServiceConfig;
use crowd_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::{AffiliationResolver, MergeOrchestrator, UnmergeOrchestrator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Entity change notifications
    pub event_bus: EventBus,
    pub config: Arc<ServiceConfig>,
    pub resolver: AffiliationResolver,
    pub merges: MergeOrchestrator,
    pub unmerges: UnmergeOrchestrator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, config: ServiceConfig) -> Self {
        let resolver = AffiliationResolver::new(
            db.clone(),
            config.affiliation.clone(),
            config.merge.retry,
        );
        let merges = MergeOrchestrator::new(db.clone(), event_bus.clone(), &config, resolver.clone());
        let unmerges = UnmergeOrchestrator::new(db.clone(), event_bus.clone(), &config, resolver.clone());

        Self {
            db,
            event_bus,
            config: Arc::new(config),
            resolver,
            merges,
            unmerges,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::affiliation_routes())
        .merge(api::merge_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
