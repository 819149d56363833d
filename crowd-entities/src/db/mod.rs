//! Database access for crowd-entities
//!
//! Repositories are free functions over `&mut SqliteConnection`, so the same call
//! works on a pooled connection or inside a merge/unmerge transaction.

pub mod activities;
pub mod affiliations;
pub mod identities;
pub mod members;
pub mod merge_actions;
pub mod organizations;

use crowd_common::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Opens (or creates) the shared entity database and makes sure the schema exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    crowd_common::db::init_database(db_path).await
}

/// Decode a JSON column
pub(crate) fn parse_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::DataIntegrity(format!("Failed to deserialize {}: {}", column, e)))
}

/// Encode a JSON column
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}
