//! Change Notification Listener
//!
//! Wraps a push-channel capability. Every insert/update/delete notification
//! for a scope invokes the subscriber's callback; the notification payload is
//! ignored, only its occurrence matters.
//!
//! Each `subscribe` yields an independent `SubscriptionHandle` that must be
//! handed back exactly once. Handles are consumed on unsubscribe, and a
//! handle's callback is gated by its own flag, so no callback fires after
//! unsubscribe even when the channel fails to drop the registration.

use crate::error::{SyncError, SyncResult};
use msync_common::ScopeKey;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Kind of remote change a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub key: ScopeKey,
    pub kind: ChangeKind,
}

/// Callback invoked by a push channel
pub type ChangeHandler = Arc<dyn Fn(ChangeNotice) + Send + Sync>;

/// Registration handle issued by a push channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub id: u64,
    /// Channel name, `{table}:{project_id}`
    pub channel: String,
}

/// Push-notification capability consumed by the core
#[async_trait::async_trait]
pub trait PushChannel: Send + Sync {
    /// Open a registration for one scope
    async fn subscribe(&self, key: &ScopeKey, handler: ChangeHandler) -> SyncResult<ChannelHandle>;

    /// Drop a registration
    async fn unsubscribe(&self, handle: &ChannelHandle) -> SyncResult<()>;
}

/// One active listener registration
#[derive(Debug)]
pub struct SubscriptionHandle {
    key: ScopeKey,
    channel_handle: ChannelHandle,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &ScopeKey {
        &self.key
    }

    pub fn channel_handle(&self) -> &ChannelHandle {
        &self.channel_handle
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop callbacks locally without contacting the channel
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Subscribe/unsubscribe front end over a push channel
#[derive(Clone)]
pub struct ChangeListener {
    channel: Arc<dyn PushChannel>,
}

impl ChangeListener {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self { channel }
    }

    /// Register `on_change` for `key`
    ///
    /// Subscribing twice for the same key yields two independent handles.
    pub async fn subscribe<F>(&self, key: &ScopeKey, on_change: F) -> SyncResult<SubscriptionHandle>
    where
        F: Fn(ChangeNotice) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&active);
        let handler: ChangeHandler = Arc::new(move |notice| {
            if gate.load(Ordering::SeqCst) {
                on_change(notice);
            }
        });

        let channel_handle = self.channel.subscribe(key, handler).await?;
        debug!(scope = %key, handle = channel_handle.id, "Subscribed to change notifications");

        Ok(SubscriptionHandle {
            key: key.clone(),
            channel_handle,
            active,
        })
    }

    /// Release one handle
    ///
    /// The callback is silenced before the channel is contacted.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()> {
        handle.deactivate();
        self.channel.unsubscribe(&handle.channel_handle).await
    }

    /// Release every handle exactly once
    ///
    /// Failures are logged and do not stop the remaining handles. Returns the
    /// number of handles whose channel unsubscribe failed.
    pub async fn unsubscribe_all(&self, handles: Vec<SubscriptionHandle>) -> usize {
        let mut failures = 0;
        for handle in handles {
            let key = handle.key.clone();
            let id = handle.channel_handle.id;
            if let Err(e) = self.unsubscribe(handle).await {
                failures += 1;
                warn!(scope = %key, handle = id, error = %e, "Unsubscribe failed; callback already silenced");
            }
        }
        failures
    }
}

struct Registration {
    key: ScopeKey,
    handler: ChangeHandler,
}

/// In-process push channel
///
/// Producers call `notify`; every registration for the scope is invoked.
/// Subscribe and unsubscribe failures can be scripted.
#[derive(Default)]
pub struct LocalPushChannel {
    registrations: RwLock<HashMap<u64, Registration>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
    broken_unsubscribes: RwLock<HashSet<u64>>,
}

impl LocalPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a notification; returns the number of handlers invoked
    pub async fn notify(&self, key: &ScopeKey, kind: ChangeKind) -> usize {
        let handlers: Vec<ChangeHandler> = self
            .registrations
            .read()
            .await
            .values()
            .filter(|r| r.key == *key)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in &handlers {
            handler(ChangeNotice {
                key: key.clone(),
                kind,
            });
        }
        handlers.len()
    }

    /// Refuse new subscriptions while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make unsubscribing `handle` fail (the registration stays in place)
    pub async fn break_unsubscribe(&self, handle: &ChannelHandle) {
        self.broken_unsubscribes.write().await.insert(handle.id);
    }

    /// Registrations currently held for `key`
    pub async fn registration_count(&self, key: &ScopeKey) -> usize {
        self.registrations
            .read()
            .await
            .values()
            .filter(|r| r.key == *key)
            .count()
    }
}

#[async_trait::async_trait]
impl PushChannel for LocalPushChannel {
    async fn subscribe(&self, key: &ScopeKey, handler: ChangeHandler) -> SyncResult<ChannelHandle> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::Channel(format!("channel {} unavailable", key)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.registrations.write().await.insert(
            id,
            Registration {
                key: key.clone(),
                handler,
            },
        );
        Ok(ChannelHandle {
            id,
            channel: key.to_string(),
        })
    }

    async fn unsubscribe(&self, handle: &ChannelHandle) -> SyncResult<()> {
        if self.broken_unsubscribes.read().await.contains(&handle.id) {
            return Err(SyncError::Channel(format!(
                "failed to remove channel {} (handle {})",
                handle.channel, handle.id
            )));
        }
        match self.registrations.write().await.remove(&handle.id) {
            Some(_) => Ok(()),
            None => Err(SyncError::Channel(format!("unknown handle {}", handle.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msync_common::EntityType;
    use std::sync::atomic::AtomicUsize;

    fn key() -> ScopeKey {
        ScopeKey::new("p1", EntityType::Task)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(ChangeNotice) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_every_kind_triggers_callback() {
        let channel = Arc::new(LocalPushChannel::new());
        let listener = ChangeListener::new(channel.clone());
        let (count, on_change) = counter();
        let handle = listener.subscribe(&key(), on_change).await.unwrap();
        assert_eq!(handle.channel_handle().channel, "tasks:p1");

        channel.notify(&key(), ChangeKind::Insert).await;
        channel.notify(&key(), ChangeKind::Update).await;
        channel.notify(&key(), ChangeKind::Delete).await;
        channel.notify(&ScopeKey::new("p2", EntityType::Task), ChangeKind::Insert).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_double_subscribe_yields_independent_handles() {
        let channel = Arc::new(LocalPushChannel::new());
        let listener = ChangeListener::new(channel.clone());
        let (count, on_change) = counter();
        let (_, other) = counter();

        let first = listener.subscribe(&key(), on_change).await.unwrap();
        let second = listener.subscribe(&key(), other).await.unwrap();
        assert_ne!(first.channel_handle(), second.channel_handle());

        listener.unsubscribe(second).await.unwrap();
        channel.notify(&key(), ChangeKind::Update).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.registration_count(&key()).await, 1);

        listener.unsubscribe(first).await.unwrap();
        assert_eq!(channel.registration_count(&key()).await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_channel_fails_subscribe() {
        let channel = Arc::new(LocalPushChannel::new());
        channel.set_unavailable(true);
        let listener = ChangeListener::new(channel);
        let (_, on_change) = counter();
        assert!(matches!(
            listener.subscribe(&key(), on_change).await,
            Err(SyncError::Channel(_))
        ));
    }
}
