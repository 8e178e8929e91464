//! Optimistic Mutation Applier
//!
//! Stages a mutation in the local collection immediately, then resolves it
//! in the background through the write router:
//! - create: provisional entity (`tmp-` id, pending) promoted to the
//!   backend's authoritative record
//! - update: patch applied in place, replaced by the backend's record
//! - delete: entry hidden, dropped for good on success
//!
//! Any failure restores the pre-mutation state; a failed create leaves no
//! entry behind.

use crate::entity::{Entity, Record};
use crate::error::{SyncError, SyncResult};
use crate::router::FallbackRouter;
use crate::store::{Resolution, SharedCollection, StagedMutation};
use msync_common::events::{EventBus, SyncEvent};
use msync_common::{MutationKind, ScopeKey};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Final result of one mutation: the authoritative record (none for deletes)
pub type MutationOutcome = SyncResult<Option<Entity>>;

/// Returned as soon as a mutation is staged locally
#[derive(Debug)]
pub struct MutationTicket {
    /// Provisional id for creates, target id otherwise
    pub id: String,
    pub kind: MutationKind,
    outcome: oneshot::Receiver<MutationOutcome>,
}

impl MutationTicket {
    /// Wait for the backend's verdict
    pub async fn outcome(self) -> MutationOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::ScopeClosed(format!(
                "{} {} abandoned before it resolved",
                self.kind, self.id
            ))),
        }
    }
}

/// Target id of an update/delete, taken from the payload's `id` field
pub fn target_id(payload: &Record) -> SyncResult<String> {
    match payload.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(SyncError::InvalidInput(
            "update and delete need the target entity's id".to_string(),
        )),
    }
}

#[derive(Clone)]
pub struct MutationApplier {
    router: FallbackRouter,
    events: EventBus,
}

impl MutationApplier {
    pub fn new(router: FallbackRouter, events: EventBus) -> Self {
        Self { router, events }
    }

    /// Stage `kind` locally and dispatch it
    ///
    /// Update and delete payloads carry the target in `id`; the remaining
    /// fields of an update are the patch.
    pub async fn apply(
        &self,
        collection: &SharedCollection,
        kind: MutationKind,
        mut payload: Record,
    ) -> SyncResult<MutationTicket> {
        let (key, staged) = {
            let mut guard = collection.write().await;
            let staged = match kind {
                MutationKind::Create => guard.stage_create(payload.clone())?,
                MutationKind::Update => {
                    let id = target_id(&payload)?;
                    guard.stage_update(&id, payload.clone())?
                }
                MutationKind::Delete => {
                    let id = target_id(&payload)?;
                    guard.stage_delete(&id)?
                }
            };
            (guard.key().clone(), staged)
        };
        payload.remove("id");

        debug!(scope = %key, id = %staged.id, kind = %kind, "Mutation staged");
        self.events.emit_lossy(SyncEvent::EntityStaged {
            project_id: key.project_id.clone(),
            entity_type: key.entity_type,
            kind,
            id: staged.id.clone(),
            timestamp: msync_common::time::now(),
        });

        let (tx, rx) = oneshot::channel();
        let ticket = MutationTicket {
            id: staged.id.clone(),
            kind,
            outcome: rx,
        };

        let task = Resolver {
            router: self.router.clone(),
            events: self.events.clone(),
            collection: collection.clone(),
            key,
            staged,
        };
        tokio::spawn(async move {
            let outcome = task.run(payload).await;
            // Caller may have dropped the ticket
            let _ = tx.send(outcome);
        });

        Ok(ticket)
    }
}

/// Background half of one mutation
struct Resolver {
    router: FallbackRouter,
    events: EventBus,
    collection: SharedCollection,
    key: ScopeKey,
    staged: StagedMutation,
}

impl Resolver {
    async fn run(self, payload: Record) -> MutationOutcome {
        let key = &self.key;
        let id = self.staged.id.as_str();
        let result = match self.staged.kind {
            MutationKind::Create => self
                .router
                .create(key, &payload)
                .await
                .map(|r| (Some(r.value), r.adapter)),
            MutationKind::Update => self
                .router
                .update(key, id, &payload)
                .await
                .map(|r| (Some(r.value), r.adapter)),
            MutationKind::Delete => self.router.remove(key, id).await.map(|r| (None, r.adapter)),
        };

        match result {
            Ok((entity, adapter)) => {
                let resolution = self.collection.write().await.confirm(&self.staged, entity.clone());
                self.confirmed(resolution, &entity, adapter);
                Ok(entity)
            }
            Err(e) => {
                let resolution = self.collection.write().await.fail(&self.staged);
                self.rolled_back(resolution, &e);
                Err(SyncError::Rollback {
                    id: self.staged.id.clone(),
                    cause: Box::new(e),
                })
            }
        }
    }

    fn confirmed(&self, resolution: Resolution, entity: &Option<Entity>, adapter: String) {
        let kind = self.staged.kind;
        if resolution == Resolution::Suppressed {
            debug!(scope = %self.key, id = %self.staged.id, "Collection discarded; confirmation not applied");
            return;
        }

        let id = match (&resolution, entity) {
            (Resolution::Confirmed { id }, _) => id.clone(),
            (_, Some(entity)) => entity.id.clone(),
            _ => self.staged.id.clone(),
        };
        info!(scope = %self.key, id = %id, kind = %kind, adapter = %adapter, ?resolution, "Mutation confirmed");

        self.events.emit_lossy(SyncEvent::MutationConfirmed {
            project_id: self.key.project_id.clone(),
            entity_type: self.key.entity_type,
            kind,
            provisional_id: (kind == MutationKind::Create).then(|| self.staged.id.clone()),
            id,
            adapter,
            timestamp: msync_common::time::now(),
        });
    }

    fn rolled_back(&self, resolution: Resolution, error: &SyncError) {
        if resolution == Resolution::Suppressed {
            debug!(scope = %self.key, id = %self.staged.id, "Collection discarded; rollback not applied");
            return;
        }
        warn!(
            scope = %self.key,
            id = %self.staged.id,
            kind = %self.staged.kind,
            error = %error,
            ?resolution,
            "Mutation rolled back"
        );
        self.events.emit_lossy(SyncEvent::MutationRolledBack {
            project_id: self.key.project_id.clone(),
            entity_type: self.key.entity_type,
            kind: self.staged.kind,
            id: self.staged.id.clone(),
            error: error.to_string(),
            timestamp: msync_common::time::now(),
        });
    }
}
