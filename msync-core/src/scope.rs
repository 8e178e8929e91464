//! Sync scope: one consumer's attachment to a collection
//!
//! A scope is what a mounted UI component holds. Opening it attaches the
//! collection, subscribes to change notifications (or starts polling) and
//! runs the opening reconciliation pass. Tearing it down releases every
//! subscription it opened, stops its timer and worker, and detaches from the
//! collection; the last detach discards the collection.
//!
//! Notifications and poll ticks never run passes directly. They wake a
//! single reconcile worker through a `Notify`, so a burst of triggers yields
//! at most one pass in flight plus one queued.

use crate::applier::MutationTicket;
use crate::engine::EngineShared;
use crate::entity::{Entity, Record};
use crate::error::{SyncError, SyncResult};
use crate::listener::SubscriptionHandle;
use crate::poller::{start_polling, PollHandle};
use crate::store::{MergeOutcome, SharedCollection};
use msync_common::events::SyncEvent;
use msync_common::{MutationKind, ScopeKey};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How remote changes reach a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Push,
    Polling,
}

/// A consumer's live view of one collection
pub struct SyncScope {
    key: ScopeKey,
    shared: Arc<EngineShared>,
    collection: SharedCollection,
    mode: DeliveryMode,
    subscriptions: Vec<SubscriptionHandle>,
    poller: Option<PollHandle>,
    trigger: Arc<Notify>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl SyncScope {
    pub(crate) async fn open(shared: Arc<EngineShared>, key: ScopeKey) -> SyncResult<Self> {
        let collection = shared.registry.attach(&key).await;
        let trigger = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let worker = spawn_worker(&shared, &collection, &trigger, &shutdown);

        let mut scope = Self {
            key: key.clone(),
            shared,
            collection,
            mode: DeliveryMode::Polling,
            subscriptions: Vec::new(),
            poller: None,
            trigger,
            shutdown,
            worker: Some(worker),
            closed: false,
        };

        scope.start_delivery().await;

        // Opening pass; a failure leaves the collection empty until the next trigger
        if let Err(e) = scope.shared.reconciler.run(&scope.collection).await {
            debug!(scope = %key, error = %e, "Opening reconciliation pass failed");
        }

        info!(scope = %key, mode = ?scope.mode, "Scope opened");
        scope.shared.events.emit_lossy(SyncEvent::ScopeOpened {
            project_id: key.project_id.clone(),
            entity_type: key.entity_type,
            realtime: scope.mode == DeliveryMode::Push,
            timestamp: msync_common::time::now(),
        });

        Ok(scope)
    }

    /// Subscribe if this entity type has a push channel, otherwise poll
    async fn start_delivery(&mut self) {
        let fallback_reason = if !self.key.entity_type.has_push_channel() {
            None
        } else if let Some(listener) = &self.shared.listener {
            let trigger = Arc::clone(&self.trigger);
            match listener.subscribe(&self.key, move |_| trigger.notify_one()).await {
                Ok(handle) => {
                    self.subscriptions.push(handle);
                    self.mode = DeliveryMode::Push;
                    return;
                }
                Err(e) => Some(e.to_string()),
            }
        } else {
            Some("no push channel configured".to_string())
        };

        let interval = self.shared.config.poll_interval_for(self.key.entity_type);
        let trigger = Arc::clone(&self.trigger);
        self.poller = Some(start_polling(self.key.clone(), interval, move || {
            trigger.notify_one();
            futures::future::ready(())
        }));
        self.mode = DeliveryMode::Polling;

        if let Some(reason) = fallback_reason {
            warn!(scope = %self.key, reason = %reason, "Push unavailable; polling instead");
            self.shared.events.emit_lossy(SyncEvent::PushFallbackToPolling {
                project_id: self.key.project_id.clone(),
                entity_type: self.key.entity_type,
                reason,
                timestamp: msync_common::time::now(),
            });
        }
    }

    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of push subscriptions this scope holds (0 or 1)
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Current visible entities
    pub async fn entities(&self) -> Vec<Entity> {
        self.collection.read().await.entities()
    }

    pub async fn get(&self, id: &str) -> Option<Entity> {
        self.collection.read().await.get(id).cloned()
    }

    /// Queue a reconciliation pass on the worker
    pub fn request_reconcile(&self) {
        if !self.closed {
            self.trigger.notify_one();
        }
    }

    /// Run a reconciliation pass now and wait for it
    pub async fn reconcile(&self) -> SyncResult<MergeOutcome> {
        self.ensure_open()?;
        self.shared.reconciler.run(&self.collection).await
    }

    /// Apply an optimistic mutation to this scope's collection
    pub async fn apply(&self, kind: MutationKind, payload: Record) -> SyncResult<MutationTicket> {
        self.ensure_open()?;
        self.shared.applier.apply(&self.collection, kind, payload).await
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.closed {
            Err(SyncError::ScopeClosed(self.key.to_string()))
        } else {
            Ok(())
        }
    }

    /// Release everything this scope opened
    ///
    /// Idempotent. Passes already in flight may finish, but their merge is
    /// dropped once the collection has been discarded.
    pub async fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let handles = std::mem::take(&mut self.subscriptions);
        if let Some(listener) = &self.shared.listener {
            let failures = listener.unsubscribe_all(handles).await;
            if failures > 0 {
                warn!(scope = %self.key, failures, "Some subscriptions failed to unsubscribe");
            }
        }
        if let Some(poller) = self.poller.take() {
            poller.join().await;
        }
        self.shutdown.cancel();
        drop(self.worker.take());

        let discarded = self.shared.registry.detach(&self.key).await;
        info!(scope = %self.key, discarded, "Scope closed");
        self.shared.events.emit_lossy(SyncEvent::ScopeClosed {
            project_id: self.key.project_id.clone(),
            entity_type: self.key.entity_type,
            timestamp: msync_common::time::now(),
        });
    }
}

impl Drop for SyncScope {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Silence callbacks and timers synchronously
        for handle in &self.subscriptions {
            handle.deactivate();
        }
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.shutdown.cancel();

        let handles = std::mem::take(&mut self.subscriptions);
        let shared = Arc::clone(&self.shared);
        let key = self.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(listener) = &shared.listener {
                        listener.unsubscribe_all(handles).await;
                    }
                    shared.registry.detach(&key).await;
                    debug!(scope = %key, "Scope released on drop");
                    shared.events.emit_lossy(SyncEvent::ScopeClosed {
                        project_id: key.project_id.clone(),
                        entity_type: key.entity_type,
                        timestamp: msync_common::time::now(),
                    });
                });
            }
            Err(_) => {
                warn!(scope = %key, "Scope dropped outside a runtime; collection stays attached");
            }
        }
    }
}

/// Reconcile worker: one pass per wake-up until shutdown
fn spawn_worker(
    shared: &Arc<EngineShared>,
    collection: &SharedCollection,
    trigger: &Arc<Notify>,
    shutdown: &CancellationToken,
) -> JoinHandle<()> {
    let reconciler = shared.reconciler.clone();
    let collection = Arc::clone(collection);
    let trigger = Arc::clone(trigger);
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = trigger.notified() => {
                    // Failures are logged and reported by the pass itself
                    let _ = reconciler.run(&collection).await;
                }
            }
        }
    })
}
