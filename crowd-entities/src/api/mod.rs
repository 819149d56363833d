//! HTTP API handlers for crowd-entities

pub mod affiliation;
pub mod health;
pub mod merges;

pub use affiliation::affiliation_routes;
pub use health::health_routes;
pub use merges::merge_routes;
