//! Configuration loading and resolution
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `CROWD_ENTITIES_CONFIG` environment variable
//! 3. User config file (`~/.config/crowd/entities.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing config file is not fatal: a warning is logged and defaults are used.
//! A config file that exists but cannot be parsed is a [`Error::Config`].

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CROWD_ENTITIES_CONFIG";
/// Environment override for the database path
pub const DATABASE_PATH_ENV_VAR: &str = "CROWD_DATABASE_PATH";
/// Environment override for the HTTP bind address
pub const BIND_ADDRESS_ENV_VAR: &str = "CROWD_BIND_ADDRESS";

/// Top-level service configuration
///
/// Constructed once in `main` and handed to every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// HTTP listen address
    pub bind_address: String,
    /// Tenant recorded on merge actions
    pub tenant_id: String,
    /// Buffered events before slow subscribers start lagging
    pub event_bus_capacity: usize,
    pub logging: LoggingConfig,
    pub merge: MergeConfig,
    pub affiliation: AffiliationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (`RUST_LOG` takes precedence when set)
    pub level: String,
}

/// Merge/unmerge execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    /// Rows relocated per statement/transaction
    pub batch_size: usize,
    /// Time budget for one relocation batch
    pub statement_timeout_ms: u64,
    /// Batch-level retry for transient failures
    pub retry: RetryPolicy,
    /// Recompute activity affiliations of the surviving member after merge/unmerge
    pub restamp_after_merge: bool,
}

/// Affiliation resolution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AffiliationConfig {
    /// Roles whose title contains one of these (case-insensitive) never count as affiliation
    pub ignored_titles: Vec<String>,
    /// Activities updated per batch when restamping
    pub restamp_batch_size: usize,
}

/// Explicit retry policy (exponential backoff, capped)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: "127.0.0.1:5740".to_string(),
            tenant_id: "875c38bd-2b1b-4e91-ad07-0cfbabb4c49f".to_string(),
            event_bus_capacity: 1000,
            logging: LoggingConfig::default(),
            merge: MergeConfig::default(),
            affiliation: AffiliationConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            statement_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            restamp_after_merge: true,
        }
    }
}

impl Default for AffiliationConfig {
    fn default() -> Self {
        Self {
            ignored_titles: vec![
                "Investor".to_string(),
                "Mentor".to_string(),
                "Board Member".to_string(),
            ],
            restamp_batch_size: 5000,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl MergeConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl ServiceConfig {
    /// Load configuration following the resolution priority, then apply env overrides
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => Self::from_file(&path)?,
            None => {
                warn!("No config file found, using compiled defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file. A missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found: {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Environment variables override individual file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(DATABASE_PATH_ENV_VAR) {
            if !path.trim().is_empty() {
                self.database_path = PathBuf::from(path);
            }
        }
        if let Ok(addr) = std::env::var(BIND_ADDRESS_ENV_VAR) {
            if !addr.trim().is_empty() {
                self.bind_address = addr;
            }
        }
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.merge.batch_size == 0 {
            return Err(Error::Config("merge.batch_size must be greater than 0".to_string()));
        }
        if self.merge.retry.max_attempts == 0 {
            return Err(Error::Config(
                "merge.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.affiliation.restamp_batch_size == 0 {
            return Err(Error::Config(
                "affiliation.restamp_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::Config("event_bus_capacity must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Serialize to TOML (used to write a starter config)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))
    }
}

/// Find the config file to load, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config file
    dirs::config_dir()
        .map(|d| d.join("crowd").join("entities.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("crowd").join("entities.db"))
        .unwrap_or_else(|| PathBuf::from("./crowd_data/entities.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(80));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(60), Duration::from_millis(100));
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = ServiceConfig::default();
        config.merge.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
