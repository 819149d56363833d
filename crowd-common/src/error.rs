//! Common error types for crowd services

use thiserror::Error;

/// Common result type for crowd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across crowd services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested member, organization or merge action does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation rejected because of the current state (e.g. merge already in progress)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data is malformed (missing/corrupt backup, corrupt intervals)
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Statement exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is worth retrying at batch level.
    ///
    /// Lock contention, pool exhaustion, dropped connections and statement timeouts are
    /// transient; everything else is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(db_err) => match db_err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(e) => {
                    let msg = e.message();
                    msg.contains("database is locked") || msg.contains("database is busy")
                }
                _ => false,
            },
            Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether a database error is a unique-constraint violation
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::Database(sqlx::Error::Database(e)) if e.is_unique_violation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        assert!(Error::Timeout("batch".to_string()).is_transient());
    }

    #[test]
    fn test_domain_errors_are_not_transient() {
        assert!(!Error::Conflict("merge in progress".to_string()).is_transient());
        assert!(!Error::NotFound("member".to_string()).is_transient());
        assert!(!Error::DataIntegrity("backup".to_string()).is_transient());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
