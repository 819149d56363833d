//! # Crowd Common Library
//!
//! Shared code for the crowd entity services:
//! - Error taxonomy shared by repositories and orchestrators
//! - Service configuration (TOML + environment)
//! - Database bootstrap and schema
//! - Event bus for entity-changed notifications
//! - Time helpers for the stored timestamp format

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
