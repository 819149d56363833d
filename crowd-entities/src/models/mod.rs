//! Data models for crowd-entities
//!
//! Members, organizations and their identities, roles and overrides, plus the
//! merge action state machine and the unmerge backup format.

pub mod activity;
pub mod affiliation;
pub mod attributes;
pub mod backup;
pub mod identity;
pub mod member;
pub mod merge_action;
pub mod organization;

pub use activity::{Activity, ActivityStamp};
pub use affiliation::{AffiliationRecords, MemberOrganization, SegmentAffiliation, SegmentAffiliationInput};
pub use backup::{BackupPayload, MemberSnapshot, MergeBackup, OrganizationSnapshot};
pub use identity::Identity;
pub use member::{Member, Reach};
pub use merge_action::{MergeAction, MergeState, MergeStatus, MergeStep};
pub use organization::Organization;
