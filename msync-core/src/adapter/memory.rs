//! In-process Source Adapter
//!
//! Holds collections in memory and lets callers script failures, latency and
//! assigned ids. Used by the integration tests.

use super::SourceAdapter;
use crate::entity::{Entity, Record};
use crate::error::SourceError;
use msync_common::{EntityType, ScopeKey};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted failure of one adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Unreachable,
    Rejected(String),
    Malformed,
    /// Never answer; only a router timeout ends the call
    Hang,
}

/// Number of calls seen per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch: usize,
    pub create: usize,
    pub update: usize,
    pub remove: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.fetch + self.create + self.update + self.remove
    }
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<ScopeKey, Vec<Entity>>,
    /// Applied to every call until cleared
    sticky_fault: Option<Fault>,
    /// Applied to the next calls, one each
    queued_faults: VecDeque<Fault>,
    assigned_ids: VecDeque<String>,
    latency: Option<Duration>,
    sequence: u64,
    calls: CallCounts,
}

/// Source Adapter backed by in-memory collections
pub struct MemoryAdapter {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Replace one collection with confirmed records built from `(id, fields)`
    pub async fn seed(&self, key: &ScopeKey, records: Vec<(String, Record)>) {
        let entities = records
            .into_iter()
            .map(|(id, fields)| Entity::confirmed(key, id, fields))
            .collect();
        self.state.lock().await.collections.insert(key.clone(), entities);
    }

    /// Current server-side contents of one collection
    pub async fn records(&self, key: &ScopeKey) -> Vec<Entity> {
        self.state
            .lock()
            .await
            .collections
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail every call with `fault` until `clear_faults`
    pub async fn fail_always(&self, fault: Fault) {
        self.state.lock().await.sticky_fault = Some(fault);
    }

    /// Fail the next call with `fault`
    pub async fn fail_next(&self, fault: Fault) {
        self.state.lock().await.queued_faults.push_back(fault);
    }

    pub async fn clear_faults(&self) {
        let mut state = self.state.lock().await;
        state.sticky_fault = None;
        state.queued_faults.clear();
    }

    /// Delay every answer by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Id handed out by the next create
    pub async fn assign_next_id(&self, id: impl Into<String>) {
        self.state.lock().await.assigned_ids.push_back(id.into());
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls
    }

    /// Count the call, then wait out latency and scripted faults
    async fn begin(&self, count: impl FnOnce(&mut CallCounts)) -> Result<(), SourceError> {
        let (fault, latency) = {
            let mut state = self.state.lock().await;
            count(&mut state.calls);
            let fault = state.queued_faults.pop_front().or_else(|| state.sticky_fault.clone());
            (fault, state.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match fault {
            None => Ok(()),
            Some(Fault::Unreachable) => Err(SourceError::unreachable(&self.name, "connection refused")),
            Some(Fault::Rejected(message)) => Err(SourceError::rejected(&self.name, message)),
            Some(Fault::Malformed) => Err(SourceError::malformed(&self.name, "unexpected response shape")),
            Some(Fault::Hang) => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    fn not_found(&self, key: &ScopeKey, id: &str) -> SourceError {
        SourceError::rejected(&self.name, format!("{} {} not found", key.entity_type, id))
    }
}

fn id_prefix(entity_type: EntityType) -> char {
    entity_type.table().chars().next().unwrap_or('x')
}

#[async_trait::async_trait]
impl SourceAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, key: &ScopeKey) -> Result<Vec<Entity>, SourceError> {
        self.begin(|c| c.fetch += 1).await?;
        Ok(self.records(key).await)
    }

    async fn create(&self, key: &ScopeKey, payload: &Record) -> Result<Entity, SourceError> {
        self.begin(|c| c.create += 1).await?;
        let mut state = self.state.lock().await;
        state.sequence += 1;
        let id = match state.assigned_ids.pop_front() {
            Some(id) => id,
            None => format!("{}-{}", id_prefix(key.entity_type), state.sequence),
        };

        let mut fields = payload.clone();
        fields.remove("id");
        let entity = Entity::confirmed(key, id, fields);
        state
            .collections
            .entry(key.clone())
            .or_default()
            .push(entity.clone());
        Ok(entity)
    }

    async fn update(&self, key: &ScopeKey, id: &str, patch: &Record) -> Result<Entity, SourceError> {
        self.begin(|c| c.update += 1).await?;
        let mut state = self.state.lock().await;
        let entity = state
            .collections
            .get_mut(key)
            .and_then(|items| items.iter_mut().find(|e| e.id == id))
            .ok_or_else(|| self.not_found(key, id))?;

        let mut patch = patch.clone();
        patch.remove("id");
        entity.apply_patch(&patch);
        Ok(entity.clone())
    }

    async fn remove(&self, key: &ScopeKey, id: &str) -> Result<(), SourceError> {
        self.begin(|c| c.remove += 1).await?;
        let mut state = self.state.lock().await;
        let items = state.collections.entry(key.clone()).or_default();
        let before = items.len();
        items.retain(|e| e.id != id);
        if items.len() == before {
            return Err(self.not_found(key, id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let adapter = MemoryAdapter::new("primary");
        let key = ScopeKey::new("p1", EntityType::Task);

        let first = adapter.create(&key, &record(json!({"title": "a"}))).await.unwrap();
        adapter.assign_next_id("t-42").await;
        let second = adapter.create(&key, &record(json!({"title": "b"}))).await.unwrap();

        assert_eq!(first.id, "t-1");
        assert_eq!(second.id, "t-42");
        assert_eq!(adapter.records(&key).await.len(), 2);
    }

    #[tokio::test]
    async fn test_queued_fault_applies_once() {
        let adapter = MemoryAdapter::new("legacy");
        let key = ScopeKey::new("p1", EntityType::Task);
        adapter.fail_next(Fault::Unreachable).await;

        assert!(matches!(adapter.fetch(&key).await, Err(SourceError::Unreachable { .. })));
        assert!(adapter.fetch(&key).await.unwrap().is_empty());
        assert_eq!(adapter.calls().await.fetch, 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_rejected() {
        let adapter = MemoryAdapter::new("primary");
        let key = ScopeKey::new("p1", EntityType::Task);
        let err = adapter.update(&key, "t-9", &Record::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_remove_deletes_record() {
        let adapter = MemoryAdapter::new("primary");
        let key = ScopeKey::new("p1", EntityType::Task);
        adapter
            .seed(&key, vec![("t-1".to_string(), record(json!({"title": "a"})))])
            .await;
        adapter.remove(&key, "t-1").await.unwrap();
        assert!(adapter.records(&key).await.is_empty());
        assert_eq!(adapter.calls().await.remove, 1);
    }
}
