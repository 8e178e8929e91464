//! Reconciliation Pass
//!
//! Refetches the full authoritative collection through the read router and
//! merges it into the local store. A failed fetch leaves the collection
//! untouched; the next notification or poll tick retries.

use crate::error::SyncResult;
use crate::router::FallbackRouter;
use crate::store::{MergeOutcome, SharedCollection};
use msync_common::events::{DiscardReason, EventBus, SyncEvent};
use tracing::{debug, warn};

/// Fetch-and-merge over one read router
#[derive(Clone)]
pub struct ReconciliationPass {
    router: FallbackRouter,
    events: EventBus,
}

impl ReconciliationPass {
    pub fn new(router: FallbackRouter, events: EventBus) -> Self {
        Self { router, events }
    }

    /// Run one pass against `collection`
    ///
    /// Returns the read path's error when every source failed; the collection
    /// is unchanged in that case.
    pub async fn run(&self, collection: &SharedCollection) -> SyncResult<MergeOutcome> {
        let (key, ticket) = {
            let mut guard = collection.write().await;
            if guard.is_closed() {
                return Ok(MergeOutcome::Discarded(DiscardReason::ScopeClosed));
            }
            (guard.key().clone(), guard.begin_reconcile())
        };

        debug!(scope = %key, ticket = ticket.seq, "Reconciliation pass dispatched");

        let routed = match self.router.fetch(&key).await {
            Ok(routed) => routed,
            Err(e) => {
                warn!(scope = %key, error = %e, "Reconciliation pass abandoned");
                self.events.emit_lossy(SyncEvent::ReconcileAbandoned {
                    project_id: key.project_id.clone(),
                    entity_type: key.entity_type,
                    error: e.to_string(),
                    timestamp: msync_common::time::now(),
                });
                return Err(e);
            }
        };

        let outcome = collection.write().await.apply_snapshot(&ticket, routed.value);

        match outcome {
            MergeOutcome::Applied(counts) => {
                debug!(
                    scope = %key,
                    adapter = %routed.adapter,
                    added = counts.added,
                    updated = counts.updated,
                    removed = counts.removed,
                    kept_pending = counts.kept_pending,
                    kept_newer = counts.kept_newer,
                    "Snapshot merged"
                );
                self.events.emit_lossy(SyncEvent::ReconcileApplied {
                    project_id: key.project_id.clone(),
                    entity_type: key.entity_type,
                    counts,
                    adapter: routed.adapter,
                    timestamp: msync_common::time::now(),
                });
            }
            MergeOutcome::Discarded(reason) => {
                debug!(scope = %key, ticket = ticket.seq, reason = %reason, "Snapshot discarded");
                if reason != DiscardReason::ScopeClosed {
                    self.events.emit_lossy(SyncEvent::ReconcileDiscarded {
                        project_id: key.project_id.clone(),
                        entity_type: key.entity_type,
                        reason,
                        timestamp: msync_common::time::now(),
                    });
                }
            }
        }

        Ok(outcome)
    }
}
