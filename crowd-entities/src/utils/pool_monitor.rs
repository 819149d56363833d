//! Connection pool monitoring utilities
//!
//! Merge steps hold write transactions; these wrappers log how long a step waited
//! for a connection and how long it kept it, which is what matters when diagnosing
//! lock contention between merges and ingestion.
//!
//! Transactions start with `BEGIN IMMEDIATE`. A deferred transaction that reads
//! and then writes cannot wait for the write lock under WAL (SQLite answers
//! SQLITE_BUSY at once), while an immediate one queues on `busy_timeout`.

use crowd_common::Result;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::time::Instant;

/// Logs release timing when the transaction ends, however it ends
struct HoldTimer {
    caller: &'static str,
    acquired_at: Instant,
    released: bool,
}

impl HoldTimer {
    fn release(&mut self, how: &'static str) {
        self.released = true;
        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                how,
                "LONG TRANSACTION - Connection held for extended period"
            );
        } else if held_ms > 1000 {
            tracing::info!(
                caller = self.caller,
                held_ms,
                how,
                "Transaction held longer than expected (>1s)"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms, how, "Connection released");
        }
    }
}

impl Drop for HoldTimer {
    fn drop(&mut self) {
        if !self.released {
            // Dropped without commit/rollback: sqlx rolls back, usually an error path
            self.release("drop");
        }
    }
}

/// Monitored transaction wrapper that logs acquisition and release timing
pub struct MonitoredTransaction {
    tx: Transaction<'static, Sqlite>,
    timer: HoldTimer,
}

impl MonitoredTransaction {
    /// Connection to run statements on
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    /// Commit the transaction and log release timing
    pub async fn commit(self) -> Result<()> {
        let Self { tx, mut timer } = self;
        tx.commit().await?;
        timer.release("commit");
        Ok(())
    }

    /// Rollback the transaction and log release timing
    pub async fn rollback(self) -> Result<()> {
        let Self { tx, mut timer } = self;
        tx.rollback().await?;
        timer.release("rollback");
        Ok(())
    }
}

/// Begin a monitored write transaction with connection pool timing logs
///
/// Holds the database write lock from the first statement on, so concurrent
/// callers run one after another instead of failing on lock upgrade.
///
/// # Example
/// ```ignore
/// let mut tx = begin_monitored(&pool, "merge::identities").await?;
/// identities::merge_identities(tx.conn(), kind, primary, secondary).await?;
/// tx.commit().await?;
/// ```
pub async fn begin_monitored(pool: &SqlitePool, caller: &'static str) -> Result<MonitoredTransaction> {
    let start = Instant::now();
    tracing::debug!(caller, "Connection acquisition requested");

    let tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(
            caller,
            wait_ms,
            "SLOW CONNECTION ACQUISITION - Pool may be saturated (all connections in use)"
        );
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx,
        timer: HoldTimer {
            caller,
            acquired_at: Instant::now(),
            released: false,
        },
    })
}
