//! Tests for config file resolution, parsing and environment overrides
//!
//! Uses serial_test: tests that touch CROWD_* environment variables are marked
//! #[serial] so they never run in parallel with each other.

use crowd_common::config::{
    resolve_config_path, RetryPolicy, ServiceConfig, BIND_ADDRESS_ENV_VAR, CONFIG_ENV_VAR,
    DATABASE_PATH_ENV_VAR,
};
use crowd_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(CONFIG_ENV_VAR);
    env::remove_var(DATABASE_PATH_ENV_VAR);
    env::remove_var(BIND_ADDRESS_ENV_VAR);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = ServiceConfig::from_file(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, ServiceConfig::default());
}

#[test]
fn test_partial_file_keeps_defaults_for_missing_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("entities.toml");
    std::fs::write(
        &path,
        r#"
bind_address = "0.0.0.0:9000"

[merge]
batch_size = 250

[merge.retry]
max_attempts = 3
"#,
    )
    .unwrap();

    let config = ServiceConfig::from_file(&path).unwrap();
    assert_eq!(config.bind_address, "0.0.0.0:9000");
    assert_eq!(config.merge.batch_size, 250);
    assert_eq!(config.merge.retry.max_attempts, 3);
    assert_eq!(config.merge.retry.initial_backoff_ms, RetryPolicy::default().initial_backoff_ms);
    assert_eq!(config.merge.statement_timeout_ms, 30_000);
    assert_eq!(config.affiliation.ignored_titles.len(), 3);
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "bind_address = [unterminated").unwrap();

    let result = ServiceConfig::from_file(&path);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_to_toml_parses_back() {
    let mut config = ServiceConfig::default();
    config.affiliation.ignored_titles = vec!["Advisor".to_string()];
    let text = config.to_toml().unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("written.toml");
    std::fs::write(&path, text).unwrap();
    assert_eq!(ServiceConfig::from_file(&path).unwrap(), config);
}

#[test]
#[serial]
fn test_cli_path_wins_over_env() {
    clear_env();
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let cli = PathBuf::from("/tmp/from-cli.toml");
    assert_eq!(resolve_config_path(Some(&cli)), Some(cli.clone()));

    clear_env();
}

#[test]
#[serial]
fn test_env_path_used_without_cli() {
    clear_env();
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    assert_eq!(resolve_config_path(None), Some(PathBuf::from("/tmp/from-env.toml")));

    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("entities.toml");
    std::fs::write(&path, "bind_address = \"127.0.0.1:1111\"\n").unwrap();

    env::set_var(BIND_ADDRESS_ENV_VAR, "127.0.0.1:2222");
    env::set_var(DATABASE_PATH_ENV_VAR, dir.path().join("override.db"));

    let config = ServiceConfig::load(Some(&path)).unwrap();
    assert_eq!(config.bind_address, "127.0.0.1:2222");
    assert_eq!(config.database_path, dir.path().join("override.db"));

    clear_env();
}

#[test]
#[serial]
fn test_load_rejects_invalid_values() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("entities.toml");
    std::fs::write(&path, "[merge.retry]\nmax_attempts = 0\n").unwrap();

    assert!(matches!(ServiceConfig::load(Some(&path)), Err(Error::Config(_))));
}
