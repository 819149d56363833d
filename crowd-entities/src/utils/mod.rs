//! Utility modules for crowd-entities

pub mod db_retry;
pub mod pool_monitor;

pub use db_retry::{retry_transient, with_timeout};
pub use pool_monitor::{begin_monitored, MonitoredTransaction};
