//! Work experience reconciliation during a merge
//!
//! Roles of the secondary entity are compared with the primary's roles that share
//! the same counterpart (the organization in a member merge, the member in an
//! organization merge):
//!
//! - unknown-dated secondary role: dropped, the primary already knows the pairing
//! - end-only secondary role: moved as-is (logged, it never resolves anyway)
//! - both current: primary keeps the earlier start, secondary dropped
//! - bounded duplicate: dropped
//! - bounded overlap: primary widened to cover both, secondary dropped
//! - anything else: moved
//!
//! [`plan_role_merge`] is pure; [`apply_role_merge`] writes the plan.

use crowd_common::events::EntityKind;
use crowd_common::Result;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::db::affiliations;
use crate::models::MemberOrganization;

/// Writes needed to fold the secondary's roles into the primary
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoleMergePlan {
    /// Secondary roles re-owned by the primary (final state)
    pub moves: Vec<MemberOrganization>,
    /// Primary roles whose dates changed
    pub updates: Vec<MemberOrganization>,
    /// Secondary role ids to delete
    pub deletes: Vec<String>,
}

fn counterpart(kind: EntityKind, role: &MemberOrganization) -> &str {
    match kind {
        EntityKind::Member => &role.organization_id,
        EntityKind::Organization => &role.member_id,
    }
}

fn reown(kind: EntityKind, role: &MemberOrganization, primary_id: &str) -> MemberOrganization {
    let mut moved = role.clone();
    match kind {
        EntityKind::Member => moved.member_id = primary_id.to_string(),
        EntityKind::Organization => moved.organization_id = primary_id.to_string(),
    }
    moved
}

fn overlaps(a: &MemberOrganization, b: &MemberOrganization) -> bool {
    match (a.date_start, a.date_end, b.date_start, b.date_end) {
        (Some(a_start), Some(a_end), Some(b_start), Some(b_end)) => {
            a_start <= a_end && b_start <= b_end && a_start <= b_end && b_start <= a_end
        }
        _ => false,
    }
}

/// Where a working role came from
#[derive(Clone, Copy, PartialEq)]
enum Origin {
    Primary,
    Moved,
}

struct Working {
    role: MemberOrganization,
    origin: Origin,
    changed: bool,
}

/// Decide what happens to every secondary role.
///
/// Member merge: `primary_roles`/`secondary_roles` are the roles of each member.
/// Organization merge: the roles held at each organization.
pub fn plan_role_merge(
    kind: EntityKind,
    primary_id: &str,
    primary_roles: &[MemberOrganization],
    secondary_roles: &[MemberOrganization],
) -> RoleMergePlan {
    let mut working: Vec<Working> = primary_roles
        .iter()
        .map(|r| Working {
            role: r.clone(),
            origin: Origin::Primary,
            changed: false,
        })
        .collect();
    let mut deletes = Vec::new();

    for role in secondary_roles {
        let key = counterpart(kind, role).to_string();
        let same: Vec<usize> = working
            .iter()
            .enumerate()
            .filter(|(_, w)| counterpart(kind, &w.role) == key)
            .map(|(i, _)| i)
            .collect();

        if same.is_empty() {
            working.push(Working {
                role: reown(kind, role, primary_id),
                origin: Origin::Moved,
                changed: true,
            });
            continue;
        }

        if role.is_unknown_dated() {
            deletes.push(role.id.clone());
            continue;
        }

        if role.is_end_only() {
            warn!(role_id = %role.id, "Moving role with only an end date");
            working.push(Working {
                role: reown(kind, role, primary_id),
                origin: Origin::Moved,
                changed: true,
            });
            continue;
        }

        if role.is_current() {
            if let Some(&i) = same.iter().find(|&&i| working[i].role.is_current()) {
                let target = &mut working[i];
                if role.date_start < target.role.date_start {
                    target.role.date_start = role.date_start;
                    target.changed = true;
                }
                deletes.push(role.id.clone());
                continue;
            }
        }

        if role.is_bounded() {
            if same.iter().any(|&i| working[i].role.same_dates(role)) {
                deletes.push(role.id.clone());
                continue;
            }
            if let Some(&i) = same.iter().find(|&&i| overlaps(&working[i].role, role)) {
                let target = &mut working[i];
                target.role.date_start = target.role.date_start.min(role.date_start);
                target.role.date_end = target.role.date_end.max(role.date_end);
                target.changed = true;
                deletes.push(role.id.clone());
                continue;
            }
        }

        working.push(Working {
            role: reown(kind, role, primary_id),
            origin: Origin::Moved,
            changed: true,
        });
    }

    let mut plan = RoleMergePlan {
        deletes,
        ..RoleMergePlan::default()
    };
    for w in working {
        match (w.origin, w.changed) {
            (Origin::Moved, _) => plan.moves.push(w.role),
            (Origin::Primary, true) => plan.updates.push(w.role),
            (Origin::Primary, false) => {}
        }
    }

    // At most one primary flag per member after the merge
    for moved in plan.moves.iter_mut().filter(|r| r.is_primary_organization) {
        let target_has_primary = primary_roles.iter().any(|p| {
            p.is_primary_organization
                && match kind {
                    EntityKind::Member => true,
                    EntityKind::Organization => p.member_id == moved.member_id,
                }
        });
        if target_has_primary {
            moved.is_primary_organization = false;
        }
    }

    plan
}

/// Write a plan and reparent the manual overrides of the secondary
pub async fn apply_role_merge(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    primary_id: &str,
    secondary_id: &str,
    plan: &RoleMergePlan,
) -> Result<()> {
    for id in &plan.deletes {
        affiliations::delete_role(conn, id).await?;
    }
    for role in plan.moves.iter().chain(&plan.updates) {
        affiliations::save_role(conn, role).await?;
    }

    let overrides = match kind {
        EntityKind::Member => affiliations::reparent_member_overrides(conn, secondary_id, primary_id).await?,
        EntityKind::Organization => {
            affiliations::reparent_organization_overrides(conn, secondary_id, primary_id).await?
        }
    };

    debug!(
        primary_id,
        secondary_id,
        moved = plan.moves.len(),
        updated = plan.updates.len(),
        deleted = plan.deletes.len(),
        overrides,
        "Roles merged"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn role(member: &str, org: &str, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> MemberOrganization {
        MemberOrganization::new(member, org).with_dates(start, end)
    }

    #[test]
    fn test_unrelated_roles_move() {
        let primary = vec![role("p", "acme", Some(day(2020, 1, 1)), None)];
        let secondary = vec![role("s", "globex", Some(day(2019, 1, 1)), Some(day(2020, 1, 1)))];

        let plan = plan_role_merge(EntityKind::Member, "p", &primary, &secondary);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].member_id, "p");
        assert_eq!(plan.moves[0].id, secondary[0].id);
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_unknown_dated_duplicate_is_dropped() {
        let primary = vec![role("p", "acme", Some(day(2020, 1, 1)), None)];
        let secondary = vec![role("s", "acme", None, None)];

        let plan = plan_role_merge(EntityKind::Member, "p", &primary, &secondary);
        assert_eq!(plan.deletes, vec![secondary[0].id.clone()]);
        assert!(plan.moves.is_empty());
    }

    #[test]
    fn test_current_roles_keep_earliest_start() {
        let primary = vec![role("p", "acme", Some(day(2021, 1, 1)), None)];
        let secondary = vec![role("s", "acme", Some(day(2018, 1, 1)), None)];

        let plan = plan_role_merge(EntityKind::Member, "p", &primary, &secondary);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].id, primary[0].id);
        assert_eq!(plan.updates[0].date_start, Some(day(2018, 1, 1)));
        assert_eq!(plan.deletes, vec![secondary[0].id.clone()]);
    }

    #[test]
    fn test_overlapping_bounded_roles_coalesce() {
        let primary = vec![role("p", "acme", Some(day(2018, 1, 1)), Some(day(2020, 1, 1)))];
        let secondary = vec![
            role("s", "acme", Some(day(2019, 6, 1)), Some(day(2021, 1, 1))),
            role("s", "acme", Some(day(2018, 1, 1)), Some(day(2020, 1, 1))),
            role("s", "acme", Some(day(2023, 1, 1)), Some(day(2024, 1, 1))),
        ];

        let plan = plan_role_merge(EntityKind::Member, "p", &primary, &secondary);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].date_start, Some(day(2018, 1, 1)));
        assert_eq!(plan.updates[0].date_end, Some(day(2021, 1, 1)));
        // Both overlapping roles fold into the widened primary role
        assert_eq!(plan.deletes, vec![secondary[0].id.clone(), secondary[1].id.clone()]);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].id, secondary[2].id);
    }

    #[test]
    fn test_moved_role_loses_primary_flag_when_target_has_one() {
        let primary = vec![role("p", "acme", Some(day(2020, 1, 1)), None).primary()];
        let secondary = vec![role("s", "globex", Some(day(2020, 1, 1)), None).primary()];

        let plan = plan_role_merge(EntityKind::Member, "p", &primary, &secondary);
        assert_eq!(plan.moves.len(), 1);
        assert!(!plan.moves[0].is_primary_organization);

        let plan = plan_role_merge(EntityKind::Member, "p", &[], &secondary);
        assert!(plan.moves[0].is_primary_organization);
    }

    #[test]
    fn test_organization_merge_matches_by_member() {
        let primary = vec![role("ann", "big", Some(day(2020, 1, 1)), None)];
        let secondary = vec![
            role("ann", "small", Some(day(2017, 1, 1)), None),
            role("bob", "small", Some(day(2019, 1, 1)), None),
        ];

        let plan = plan_role_merge(EntityKind::Organization, "big", &primary, &secondary);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].date_start, Some(day(2017, 1, 1)));
        assert_eq!(plan.deletes, vec![secondary[0].id.clone()]);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].member_id, "bob");
        assert_eq!(plan.moves[0].organization_id, "big");
    }
}
