//! Supporting types carried by sync events

use serde::{Deserialize, Serialize};

/// Outcome counts of one merged reconciliation snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCounts {
    /// Entries that did not exist locally
    pub added: usize,
    /// Non-pending entries replaced wholesale
    pub updated: usize,
    /// Non-pending entries absent from the snapshot
    pub removed: usize,
    /// Entries left untouched because a local mutation is still pending
    pub kept_pending: usize,
    /// Entries left untouched because a local write is newer than the snapshot
    pub kept_newer: usize,
}

impl MergeCounts {
    /// True when the merge changed nothing visible
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// Why a snapshot was thrown away instead of merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// A pass dispatched later has already been merged
    OutOfOrder,
    /// The collection was discarded while the fetch was in flight
    ScopeClosed,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::OutOfOrder => write!(f, "out_of_order"),
            DiscardReason::ScopeClosed => write!(f, "scope_closed"),
        }
    }
}
