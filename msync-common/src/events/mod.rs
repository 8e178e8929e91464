//! Event types for the msync event system
//!
//! Provides the `SyncEvent` definitions and the `EventBus` the UI layer
//! listens on for spinners, toasts and refreshed collections.

mod shared_types;

pub use shared_types::{DiscardReason, MergeCounts};

use crate::model::{EntityType, MutationKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Synchronization events
///
/// Events are broadcast via `EventBus` and serialize to tagged JSON so the
/// binary can print them as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A collection scope was opened (component mounted)
    ScopeOpened {
        project_id: String,
        entity_type: EntityType,
        /// Whether change notifications arrive by push (false: polling)
        realtime: bool,
        timestamp: DateTime<Utc>,
    },

    /// A collection scope was torn down (component unmounted)
    ScopeClosed {
        project_id: String,
        entity_type: EntityType,
        timestamp: DateTime<Utc>,
    },

    /// An optimistic mutation was applied locally and is awaiting a backend
    ///
    /// Triggers:
    /// - UI: show a spinner on `id`
    EntityStaged {
        project_id: String,
        entity_type: EntityType,
        kind: MutationKind,
        /// Provisional id for creates, entity id otherwise
        id: String,
        timestamp: DateTime<Utc>,
    },

    /// A backend accepted the mutation; the local entry is now authoritative
    MutationConfirmed {
        project_id: String,
        entity_type: EntityType,
        kind: MutationKind,
        /// Provisional id replaced by `id` (creates only)
        provisional_id: Option<String>,
        id: String,
        /// Adapter that accepted the write
        adapter: String,
        timestamp: DateTime<Utc>,
    },

    /// The mutation failed and the local collection was restored
    ///
    /// Triggers:
    /// - UI: transient error notification
    MutationRolledBack {
        project_id: String,
        entity_type: EntityType,
        kind: MutationKind,
        id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A reconciliation snapshot was merged
    ReconcileApplied {
        project_id: String,
        entity_type: EntityType,
        counts: MergeCounts,
        /// Adapter that served the snapshot
        adapter: String,
        timestamp: DateTime<Utc>,
    },

    /// The read path failed; the collection was left unchanged
    ReconcileAbandoned {
        project_id: String,
        entity_type: EntityType,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A fetched snapshot was thrown away without merging
    ReconcileDiscarded {
        project_id: String,
        entity_type: EntityType,
        reason: DiscardReason,
        timestamp: DateTime<Utc>,
    },

    /// Push subscription unavailable; the scope is polling instead
    PushFallbackToPolling {
        project_id: String,
        entity_type: EntityType,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl SyncEvent {
    /// Event name, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ScopeOpened { .. } => "ScopeOpened",
            SyncEvent::ScopeClosed { .. } => "ScopeClosed",
            SyncEvent::EntityStaged { .. } => "EntityStaged",
            SyncEvent::MutationConfirmed { .. } => "MutationConfirmed",
            SyncEvent::MutationRolledBack { .. } => "MutationRolledBack",
            SyncEvent::ReconcileApplied { .. } => "ReconcileApplied",
            SyncEvent::ReconcileAbandoned { .. } => "ReconcileAbandoned",
            SyncEvent::ReconcileDiscarded { .. } => "ReconcileDiscarded",
            SyncEvent::PushFallbackToPolling { .. } => "PushFallbackToPolling",
        }
    }

    /// Collection the event belongs to
    pub fn scope(&self) -> (&str, EntityType) {
        match self {
            SyncEvent::ScopeOpened { project_id, entity_type, .. }
            | SyncEvent::ScopeClosed { project_id, entity_type, .. }
            | SyncEvent::EntityStaged { project_id, entity_type, .. }
            | SyncEvent::MutationConfirmed { project_id, entity_type, .. }
            | SyncEvent::MutationRolledBack { project_id, entity_type, .. }
            | SyncEvent::ReconcileApplied { project_id, entity_type, .. }
            | SyncEvent::ReconcileAbandoned { project_id, entity_type, .. }
            | SyncEvent::ReconcileDiscarded { project_id, entity_type, .. }
            | SyncEvent::PushFallbackToPolling { project_id, entity_type, .. } => {
                (project_id.as_str(), *entity_type)
            }
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::broadcast` internally:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use msync_common::events::{EventBus, SyncEvent};
/// use msync_common::EntityType;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SyncEvent::ScopeClosed {
///     project_id: "p1".to_string(),
///     entity_type: EntityType::Task,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "ScopeClosed");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
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

    fn staged(id: &str) -> SyncEvent {
        SyncEvent::EntityStaged {
            project_id: "p1".to_string(),
            entity_type: EntityType::Task,
            kind: MutationKind::Create,
            id: id.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers_fails() {
        let bus = EventBus::new(10);
        assert!(bus.emit(staged("tmp-1")).is_err());
        // lossy variant must not panic
        bus.emit_lossy(staged("tmp-1"));
    }

    #[test]
    fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = staged("tmp-1");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(rx1.try_recv().unwrap(), event);
        assert_eq!(rx2.try_recv().unwrap(), event);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SyncEvent::ReconcileApplied {
            project_id: "p1".to_string(),
            entity_type: EntityType::VoiceNote,
            counts: MergeCounts {
                added: 2,
                ..Default::default()
            },
            adapter: "primary".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ReconcileApplied");
        assert_eq!(json["entity_type"], "voice_note");
        assert_eq!(json["counts"]["added"], 2);
    }

    #[test]
    fn test_event_scope() {
        let event = staged("tmp-1");
        assert_eq!(event.scope(), ("p1", EntityType::Task));
    }
}
