//! Per-scope collection store
//!
//! One `Collection` per (project, entity type). It is the only shared mutable
//! state in the core and is touched by exactly two writers: the mutation
//! applier (stage, then confirm or fail) and the reconciliation merge.
//!
//! Ordering rules enforced here:
//! - an id with any in-flight mutation is pending; merges never touch it
//! - a merge never overwrites or removes an entry whose local write happened
//!   after the merge's fetch was dispatched, and never resurrects an id whose
//!   delete was confirmed after dispatch
//! - a snapshot dispatched before the last applied one is discarded
//! - resolving an older mutation never clobbers a newer pending one on the
//!   same id

use crate::entity::{Entity, Record};
use crate::error::{SyncError, SyncResult};
use msync_common::events::{DiscardReason, MergeCounts};
use msync_common::{LifecycleState, MutationKind, ScopeKey};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Collection shared between a scope, its workers and the applier
pub type SharedCollection = Arc<RwLock<Collection>>;

/// Handle on one locally staged mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMutation {
    pub seq: u64,
    /// Provisional id for creates, target id otherwise
    pub id: String,
    pub kind: MutationKind,
}

/// What resolving a staged mutation did to the collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Entry now holds the authoritative record under `id`
    Confirmed { id: String },
    /// Entry restored to its pre-mutation state (creates: removed)
    RolledBack,
    /// A newer mutation on the same id is still pending; only its rollback
    /// point moved
    Rebased,
    /// A newer mutation on the same id already resolved successfully
    Superseded,
    /// The collection was discarded
    Suppressed,
}

/// Result of offering a fetched snapshot to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied(MergeCounts),
    Discarded(DiscardReason),
}

/// Taken when a reconciliation fetch is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTicket {
    pub seq: u64,
    /// Local revision at dispatch time
    pub dispatch_rev: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    entity: Entity,
    /// Revision of the last local write (0: only ever written by merges)
    local_rev: u64,
}

#[derive(Debug, Clone)]
struct Snapshot {
    entity: Entity,
    index: usize,
}

#[derive(Debug)]
struct InFlight {
    seq: u64,
    kind: MutationKind,
    /// Pre-mutation state; `None` for creates
    snapshot: Option<Snapshot>,
}

/// Insertion-ordered map from entity id to entity
#[derive(Debug)]
pub struct Collection {
    key: ScopeKey,
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    revision: u64,
    next_mutation: u64,
    /// In-flight mutations per id, oldest first
    inflight: HashMap<String, Vec<InFlight>>,
    /// Revision at which each delete was confirmed
    confirmed_deletes: HashMap<String, u64>,
    next_ticket: u64,
    last_applied_ticket: Option<u64>,
    closed: bool,
}

impl Collection {
    pub fn new(key: ScopeKey) -> Self {
        Self {
            key,
            order: Vec::new(),
            slots: HashMap::new(),
            revision: 0,
            next_mutation: 0,
            inflight: HashMap::new(),
            confirmed_deletes: HashMap::new(),
            next_ticket: 0,
            last_applied_ticket: None,
            closed: false,
        }
    }

    pub fn shared(key: ScopeKey) -> SharedCollection {
        Arc::new(RwLock::new(Self::new(key)))
    }

    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    /// Visible entities in insertion order
    pub fn entities(&self) -> Vec<Entity> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id))
            .map(|slot| slot.entity.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.slots.get(id).map(|slot| &slot.entity)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether any mutation on `id` is still in flight
    pub fn is_pending(&self, id: &str) -> bool {
        self.inflight.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Discard all state; later stages, resolutions and merges are refused
    pub fn close(&mut self) {
        self.closed = true;
        self.order.clear();
        self.slots.clear();
        self.inflight.clear();
        self.confirmed_deletes.clear();
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.order.iter().position(|x| x == id)
    }

    fn remove_entry(&mut self, id: &str) -> Option<(Entity, usize)> {
        let index = self.index_of(id)?;
        self.order.remove(index);
        self.slots.remove(id).map(|slot| (slot.entity, index))
    }

    /// Replace the entry in place, or insert it at `index`
    fn put(&mut self, entity: Entity, index: usize, local_rev: u64) {
        if !self.slots.contains_key(&entity.id) {
            let at = index.min(self.order.len());
            self.order.insert(at, entity.id.clone());
        }
        self.slots.insert(entity.id.clone(), Slot { entity, local_rev });
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.closed {
            Err(SyncError::ScopeClosed(self.key.to_string()))
        } else {
            Ok(())
        }
    }

    /// Target of an update/delete must be visible and authoritative
    fn check_target(&self, id: &str) -> SyncResult<usize> {
        if msync_common::uuid_utils::is_provisional(id) {
            return Err(SyncError::InvalidInput(format!(
                "{} {} has not been confirmed yet",
                self.key.entity_type, id
            )));
        }
        self.index_of(id)
            .ok_or_else(|| SyncError::NotFound(format!("{} {} in {}", self.key.entity_type, id, self.key)))
    }

    fn push_inflight(&mut self, id: &str, kind: MutationKind, snapshot: Option<Snapshot>) -> StagedMutation {
        self.next_mutation += 1;
        let seq = self.next_mutation;
        self.inflight
            .entry(id.to_string())
            .or_default()
            .push(InFlight { seq, kind, snapshot });
        StagedMutation {
            seq,
            id: id.to_string(),
            kind,
        }
    }

    /// Insert a provisional entity for a create
    pub fn stage_create(&mut self, mut fields: Record) -> SyncResult<StagedMutation> {
        self.ensure_open()?;
        fields.remove("id");
        let entity = Entity::provisional(&self.key, fields);
        let id = entity.id.clone();
        let rev = self.bump();
        self.order.push(id.clone());
        self.slots.insert(id.clone(), Slot { entity, local_rev: rev });
        Ok(self.push_inflight(&id, MutationKind::Create, None))
    }

    /// Apply a shallow patch in place and mark the entry pending
    pub fn stage_update(&mut self, id: &str, mut patch: Record) -> SyncResult<StagedMutation> {
        self.ensure_open()?;
        let index = self.check_target(id)?;
        patch.remove("id");
        let rev = self.bump();

        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| SyncError::NotFound(format!("{} {}", self.key.entity_type, id)))?;
        let snapshot = Snapshot {
            entity: slot.entity.clone(),
            index,
        };
        slot.entity.apply_patch(&patch);
        slot.entity.lifecycle = LifecycleState::Pending;
        slot.local_rev = rev;

        Ok(self.push_inflight(id, MutationKind::Update, Some(snapshot)))
    }

    /// Hide the entry until the delete resolves
    pub fn stage_delete(&mut self, id: &str) -> SyncResult<StagedMutation> {
        self.ensure_open()?;
        self.check_target(id)?;
        self.bump();
        let (entity, index) = self
            .remove_entry(id)
            .ok_or_else(|| SyncError::NotFound(format!("{} {}", self.key.entity_type, id)))?;

        Ok(self.push_inflight(id, MutationKind::Delete, Some(Snapshot { entity, index })))
    }

    /// Apply a backend's acceptance of a staged mutation
    ///
    /// `authoritative` is the backend's record for creates and updates.
    pub fn confirm(&mut self, staged: &StagedMutation, authoritative: Option<Entity>) -> Resolution {
        if self.closed {
            return Resolution::Suppressed;
        }
        let Some(stack) = self.inflight.get_mut(&staged.id) else {
            return Resolution::Superseded;
        };
        let Some(pos) = stack.iter().position(|m| m.seq == staged.seq) else {
            return Resolution::Superseded;
        };

        if pos + 1 < stack.len() {
            let done = stack.remove(pos);
            if let Some(mut entity) = authoritative {
                let newer = &mut stack[pos];
                let index = newer
                    .snapshot
                    .as_ref()
                    .or(done.snapshot.as_ref())
                    .map(|s| s.index)
                    .unwrap_or(0);
                entity.id = staged.id.clone();
                entity.lifecycle = if pos == 0 {
                    LifecycleState::Confirmed
                } else {
                    LifecycleState::Pending
                };
                newer.snapshot = Some(Snapshot { entity, index });
            }
            return Resolution::Rebased;
        }

        // Latest mutation succeeded: older ones in flight can no longer win
        self.inflight.remove(&staged.id);
        let rev = self.bump();

        match staged.kind {
            MutationKind::Create => self.promote(staged, authoritative, rev),
            MutationKind::Update => {
                let index = self.index_of(&staged.id).unwrap_or(self.order.len());
                let entity = match authoritative {
                    Some(mut entity) => {
                        entity.id = staged.id.clone();
                        entity
                    }
                    None => match self.slots.get(&staged.id) {
                        Some(slot) => slot.entity.clone(),
                        None => return Resolution::Confirmed { id: staged.id.clone() },
                    },
                };
                let mut entity = entity;
                entity.lifecycle = LifecycleState::Confirmed;
                self.put(entity, index, rev);
                Resolution::Confirmed { id: staged.id.clone() }
            }
            MutationKind::Delete => {
                self.remove_entry(&staged.id);
                self.confirmed_deletes.insert(staged.id.clone(), rev);
                Resolution::Confirmed { id: staged.id.clone() }
            }
        }
    }

    /// Replace a provisional entry with its authoritative counterpart
    fn promote(&mut self, staged: &StagedMutation, authoritative: Option<Entity>, rev: u64) -> Resolution {
        let Some(mut entity) = authoritative else {
            if let Some(slot) = self.slots.get_mut(&staged.id) {
                slot.entity.lifecycle = LifecycleState::Confirmed;
                slot.local_rev = rev;
            }
            return Resolution::Confirmed { id: staged.id.clone() };
        };
        entity.lifecycle = LifecycleState::Confirmed;
        let id = entity.id.clone();

        if self.inflight.contains_key(&id) {
            // A pass already delivered this id and the user is editing it
            warn!(scope = %self.key, id = %id, "Authoritative copy has its own pending mutation; dropping provisional entry");
            self.remove_entry(&staged.id);
            return Resolution::Confirmed { id };
        }

        if self.slots.remove(&id).is_some() {
            debug!(scope = %self.key, id = %id, "Dropping duplicate delivered before promotion");
            self.order.retain(|x| *x != id);
        }

        match self.index_of(&staged.id) {
            Some(index) => {
                self.slots.remove(&staged.id);
                self.order[index] = id.clone();
            }
            None => self.order.push(id.clone()),
        }
        self.slots.insert(id.clone(), Slot { entity, local_rev: rev });
        Resolution::Confirmed { id }
    }

    /// Undo a staged mutation after every backend failed or one rejected it
    pub fn fail(&mut self, staged: &StagedMutation) -> Resolution {
        if self.closed {
            return Resolution::Suppressed;
        }
        let Some(stack) = self.inflight.get_mut(&staged.id) else {
            return Resolution::Superseded;
        };
        let Some(pos) = stack.iter().position(|m| m.seq == staged.seq) else {
            return Resolution::Superseded;
        };

        let done = stack.remove(pos);
        if pos < stack.len() {
            // The newer mutation now rolls back to what this one started from
            stack[pos].snapshot = done.snapshot;
            return Resolution::Rebased;
        }
        let settled = stack.is_empty();
        if settled {
            self.inflight.remove(&staged.id);
        }
        let rev = self.bump();

        match done.kind {
            MutationKind::Create => {
                self.remove_entry(&staged.id);
            }
            MutationKind::Update | MutationKind::Delete => {
                if let Some(Snapshot { mut entity, index }) = done.snapshot {
                    if settled {
                        entity.lifecycle = LifecycleState::Confirmed;
                    }
                    self.put(entity, index, rev);
                }
            }
        }
        Resolution::RolledBack
    }

    /// Record the dispatch of a reconciliation fetch
    pub fn begin_reconcile(&mut self) -> ReconcileTicket {
        self.next_ticket += 1;
        ReconcileTicket {
            seq: self.next_ticket,
            dispatch_rev: self.revision,
        }
    }

    /// Merge a full authoritative snapshot
    pub fn apply_snapshot(&mut self, ticket: &ReconcileTicket, snapshot: Vec<Entity>) -> MergeOutcome {
        if self.closed {
            return MergeOutcome::Discarded(DiscardReason::ScopeClosed);
        }
        if matches!(self.last_applied_ticket, Some(last) if ticket.seq < last) {
            return MergeOutcome::Discarded(DiscardReason::OutOfOrder);
        }
        self.last_applied_ticket = Some(ticket.seq);

        let newer_than_fetch = |local_rev: u64| local_rev > ticket.dispatch_rev;
        let mut counts = MergeCounts::default();
        let mut seen = HashSet::with_capacity(snapshot.len());

        for mut entity in snapshot {
            if !seen.insert(entity.id.clone()) {
                continue;
            }
            entity.lifecycle = LifecycleState::Confirmed;

            if self.inflight.contains_key(&entity.id) {
                counts.kept_pending += 1;
                continue;
            }
            if matches!(self.confirmed_deletes.get(&entity.id), Some(rev) if newer_than_fetch(*rev)) {
                counts.kept_newer += 1;
                continue;
            }

            match self.slots.get_mut(&entity.id) {
                Some(slot) if newer_than_fetch(slot.local_rev) => counts.kept_newer += 1,
                Some(slot) => {
                    if !slot.entity.same_content(&entity) || slot.entity.lifecycle != entity.lifecycle {
                        slot.entity = entity;
                        counts.updated += 1;
                    }
                }
                None => {
                    self.order.push(entity.id.clone());
                    self.slots.insert(entity.id.clone(), Slot { entity, local_rev: 0 });
                    counts.added += 1;
                }
            }
        }

        let absent: Vec<String> = self.order.iter().filter(|id| !seen.contains(*id)).cloned().collect();
        for id in absent {
            if self.inflight.contains_key(&id) {
                counts.kept_pending += 1;
            } else if self.slots.get(&id).is_some_and(|slot| newer_than_fetch(slot.local_rev)) {
                counts.kept_newer += 1;
            } else {
                self.remove_entry(&id);
                counts.removed += 1;
            }
        }

        self.confirmed_deletes.retain(|_, rev| newer_than_fetch(*rev));
        MergeOutcome::Applied(counts)
    }
}

#[derive(Debug)]
struct Registered {
    collection: SharedCollection,
    scopes: usize,
}

/// Collections by scope key, reference-counted by attached scopes
#[derive(Debug, Default)]
pub struct StoreRegistry {
    entries: RwLock<HashMap<ScopeKey, Registered>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach one scope, creating the collection on first use
    pub async fn attach(&self, key: &ScopeKey) -> SharedCollection {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.clone()).or_insert_with(|| Registered {
            collection: Collection::shared(key.clone()),
            scopes: 0,
        });
        entry.scopes += 1;
        Arc::clone(&entry.collection)
    }

    /// Detach one scope; the last detach discards the collection
    ///
    /// Returns true when the collection was discarded.
    pub async fn detach(&self, key: &ScopeKey) -> bool {
        let discarded = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            entry.scopes = entry.scopes.saturating_sub(1);
            if entry.scopes > 0 {
                return false;
            }
            entries.remove(key).map(|entry| entry.collection)
        };

        match discarded {
            Some(collection) => {
                collection.write().await.close();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, key: &ScopeKey) -> Option<SharedCollection> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|entry| Arc::clone(&entry.collection))
    }

    /// Number of scopes attached to `key`
    pub async fn scope_count(&self, key: &ScopeKey) -> usize {
        self.entries.read().await.get(key).map_or(0, |entry| entry.scopes)
    }
}
