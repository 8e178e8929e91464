//! Fallback Router
//!
//! Invokes Source Adapters in priority order. `Unreachable` and `Malformed`
//! move on to the next adapter, `Rejected` stops immediately, and exhausting
//! the list yields `AllSourcesFailed` carrying the last error. Every attempt
//! is bounded by the configured attempt timeout.

use crate::adapter::SourceAdapter;
use crate::entity::{Entity, Record};
use crate::error::{SourceError, SyncError, SyncResult};
use msync_common::config::BackendKind;
use msync_common::ScopeKey;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A successful routed call and the adapter that served it
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub value: T,
    pub adapter: String,
}

/// Priority-ordered dispatcher over Source Adapters
///
/// Holds no state between calls.
#[derive(Clone)]
pub struct FallbackRouter {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    attempt_timeout: Duration,
}

impl FallbackRouter {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, attempt_timeout: Duration) -> SyncResult<Self> {
        if adapters.is_empty() {
            return Err(SyncError::InvalidInput(
                "Fallback router needs at least one adapter".to_string(),
            ));
        }
        Ok(Self {
            adapters,
            attempt_timeout,
        })
    }

    /// Build a router from a configured backend order
    ///
    /// Backends listed in `order` but not configured are skipped.
    pub fn from_order(
        order: &[BackendKind],
        available: &HashMap<BackendKind, Arc<dyn SourceAdapter>>,
        attempt_timeout: Duration,
    ) -> SyncResult<Self> {
        let mut adapters = Vec::with_capacity(order.len());
        for kind in order {
            match available.get(kind) {
                Some(adapter) => adapters.push(Arc::clone(adapter)),
                None => warn!(backend = %kind, "Backend in adapter order is not configured; skipping"),
            }
        }
        Self::new(adapters, attempt_timeout)
    }

    /// Adapter names in priority order
    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub async fn fetch(&self, key: &ScopeKey) -> SyncResult<Routed<Vec<Entity>>> {
        self.dispatch("fetch", key, move |a| async move { a.fetch(key).await })
            .await
    }

    pub async fn fetch_one(&self, key: &ScopeKey, id: &str) -> SyncResult<Routed<Entity>> {
        self.dispatch("fetch_one", key, move |a| async move { a.fetch_one(key, id).await })
            .await
    }

    pub async fn create(&self, key: &ScopeKey, payload: &Record) -> SyncResult<Routed<Entity>> {
        self.dispatch("create", key, move |a| async move { a.create(key, payload).await })
            .await
    }

    pub async fn update(&self, key: &ScopeKey, id: &str, patch: &Record) -> SyncResult<Routed<Entity>> {
        self.dispatch("update", key, move |a| async move { a.update(key, id, patch).await })
            .await
    }

    pub async fn remove(&self, key: &ScopeKey, id: &str) -> SyncResult<Routed<()>> {
        self.dispatch("remove", key, move |a| async move { a.remove(key, id).await })
            .await
    }

    /// Run `call` against each adapter in order until one succeeds
    async fn dispatch<T, F, Fut>(&self, operation: &'static str, key: &ScopeKey, call: F) -> SyncResult<Routed<T>>
    where
        F: Fn(Arc<dyn SourceAdapter>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, SourceError>> + Send,
        T: Send,
    {
        let mut last_error = None;
        let mut attempts = 0;

        for adapter in &self.adapters {
            attempts += 1;
            let name = adapter.name().to_string();
            debug!(scope = %key, adapter = %name, operation, attempt = attempts, "Dispatching");

            let outcome = match tokio::time::timeout(self.attempt_timeout, call(Arc::clone(adapter))).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::unreachable(
                    &name,
                    format!("timed out after {}ms", self.attempt_timeout.as_millis()),
                )),
            };

            match outcome {
                Ok(value) => {
                    return Ok(Routed {
                        value,
                        adapter: name,
                    })
                }
                Err(e) if !e.is_recoverable() => {
                    debug!(scope = %key, adapter = %name, operation, error = %e, "Rejected; not trying other sources");
                    return Err(SyncError::Source(e));
                }
                Err(e) => {
                    warn!(scope = %key, adapter = %name, operation, error = %e, "Source failed; falling back");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(SyncError::AllSourcesFailed { attempts, last }),
            None => Err(SyncError::InvalidInput(
                "Fallback router has no adapters".to_string(),
            )),
        }
    }
}
