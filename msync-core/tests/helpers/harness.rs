//! Engine harness over in-memory backends

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use msync_common::config::{BackendKind, SyncConfig};
use msync_common::events::SyncEvent;
use msync_core::adapter::MemoryAdapter;
use msync_core::{LocalPushChannel, Record, SourceAdapter, SyncEngine};
use serde_json::Value;
use tokio::sync::broadcast;

/// Engine wired to `primary` and `legacy` memory adapters
pub struct Harness {
    pub primary: Arc<MemoryAdapter>,
    pub legacy: Arc<MemoryAdapter>,
    pub channel: Arc<LocalPushChannel>,
    pub engine: SyncEngine,
}

impl Harness {
    /// Default configuration with a push channel
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default(), true)
    }

    /// Default configuration without any push capability
    pub fn without_push() -> Self {
        Self::with_config(SyncConfig::default(), false)
    }

    pub fn with_config(config: SyncConfig, push: bool) -> Self {
        let primary = Arc::new(MemoryAdapter::new("primary"));
        let legacy = Arc::new(MemoryAdapter::new("legacy"));
        let channel = Arc::new(LocalPushChannel::new());

        let mut adapters: HashMap<BackendKind, Arc<dyn SourceAdapter>> = HashMap::new();
        adapters.insert(BackendKind::Primary, primary.clone());
        adapters.insert(BackendKind::Legacy, legacy.clone());

        let engine = if push {
            SyncEngine::with_push_channel(config, adapters, channel.clone())
        } else {
            SyncEngine::new(config, adapters)
        }
        .expect("engine should build");

        Self {
            primary,
            legacy,
            channel,
            engine,
        }
    }
}

/// JSON object literal to a record
pub fn record(value: Value) -> Record {
    value.as_object().cloned().expect("record literal must be an object")
}

/// Receive events until one matches, failing after `within`
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SyncEvent>,
    within: Duration,
    mut matches: F,
) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
