//! Services for affiliation resolution and merge/unmerge
//!
//! Each service owns a pool handle and is cheap to clone into request handlers.

pub mod affiliation_resolver;
pub mod merge_backup;
pub mod merge_orchestrator;
pub mod role_merger;
pub mod unmerge;

pub use affiliation_resolver::{AffiliationResolver, OrganizationSizeEstimator, StoredSizeEstimator};
pub use merge_orchestrator::MergeOrchestrator;
pub use role_merger::{plan_role_merge, RoleMergePlan};
pub use unmerge::UnmergeOrchestrator;
