//! Timestamp utilities
//!
//! Timestamps are stored as RFC 3339 UTC strings with millisecond precision
//! (`2024-01-01T00:00:00.000Z`), which sort lexicographically in SQL.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Format an optional timestamp for storage
pub fn to_db_opt(ts: Option<&DateTime<Utc>>) -> Option<String> {
    ts.map(to_db)
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::DataIntegrity(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(from_db).transpose()
}
