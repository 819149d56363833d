//! Entity change events
//!
//! The merge and unmerge orchestrators publish here after their transactions commit.
//! Search-index sync and audit logging subscribe from the outside; publishing is
//! fire-and-forget, so a missing or lagging subscriber never fails a merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Kind of entity taking part in a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Member,
    #[serde(rename = "org")]
    Organization,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Member => "member",
            EntityKind::Organization => "org",
        }
    }
}

/// Crowd event types
///
/// Serialized with a `type` tag so subscribers can forward them as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CrowdEvent {
    /// Member profile, identities, roles or activities changed
    MemberChanged {
        member_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Organization profile, identities, members or activities changed
    OrganizationChanged {
        organization_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Merge finished; audit consumers record it
    MergeCompleted {
        merge_action_id: String,
        entity: EntityKind,
        primary_id: String,
        secondary_id: String,
        action_by: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Merge stopped in ERROR state
    MergeFailed {
        merge_action_id: String,
        entity: EntityKind,
        primary_id: String,
        secondary_id: String,
        step: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Unmerge finished
    UnmergeCompleted {
        merge_action_id: String,
        entity: EntityKind,
        primary_id: String,
        secondary_id: String,
        activities_moved: u64,
        action_by: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl CrowdEvent {
    /// Entity-changed event for one side of a merge
    pub fn entity_changed(entity: EntityKind, id: &str) -> Self {
        match entity {
            EntityKind::Member => CrowdEvent::MemberChanged {
                member_id: id.to_string(),
                timestamp: Utc::now(),
            },
            EntityKind::Organization => CrowdEvent::OrganizationChanged {
                organization_id: id.to_string(),
                timestamp: Utc::now(),
            },
        }
    }
}

/// Broadcast bus for [`CrowdEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CrowdEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before slow receivers start
    /// missing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CrowdEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CrowdEvent) -> Result<usize, broadcast::error::SendError<CrowdEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CrowdEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit_lossy(CrowdEvent::entity_changed(EntityKind::Member, "m-1"));

        match rx.recv().await.unwrap() {
            CrowdEvent::MemberChanged { member_id, .. } => assert_eq!(member_id, "m-1"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(CrowdEvent::entity_changed(EntityKind::Organization, "o-1")).is_err());
        // lossy variant must not panic
        bus.emit_lossy(CrowdEvent::entity_changed(EntityKind::Organization, "o-1"));
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 10);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(CrowdEvent::entity_changed(EntityKind::Organization, "o-9")).unwrap();
        assert_eq!(json["type"], "OrganizationChanged");
        assert_eq!(json["organization_id"], "o-9");
    }
}
