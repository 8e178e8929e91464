//! Synchronization engine
//!
//! Owns the configuration, the read and write routers, the collection
//! registry, the event bus and the optional push channel. UI-facing entry
//! points: `open_scope`, `apply`, `reconcile`, `snapshot`.

use crate::adapter::{LegacyAdapter, PrimaryAdapter, SourceAdapter};
use crate::applier::{MutationApplier, MutationTicket};
use crate::entity::{Entity, Record};
use crate::error::{SyncError, SyncResult};
use crate::listener::{ChangeListener, PushChannel};
use crate::reconcile::ReconciliationPass;
use crate::router::FallbackRouter;
use crate::scope::SyncScope;
use crate::store::{MergeOutcome, SharedCollection, StoreRegistry};
use msync_common::config::{BackendKind, SyncConfig, TomlConfig};
use msync_common::events::EventBus;
use msync_common::{EntityType, MutationKind, ScopeKey};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// State shared by the engine and every scope it opened
pub(crate) struct EngineShared {
    pub(crate) config: SyncConfig,
    pub(crate) reconciler: ReconciliationPass,
    pub(crate) applier: MutationApplier,
    pub(crate) registry: StoreRegistry,
    pub(crate) events: EventBus,
    pub(crate) listener: Option<ChangeListener>,
}

/// Entry point of the synchronization core
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<EngineShared>,
}

impl SyncEngine {
    /// Build an engine over the given backends
    ///
    /// `adapters` maps each configured backend to its adapter; the read and
    /// write orders from `config` pick among them.
    pub fn new(config: SyncConfig, adapters: HashMap<BackendKind, Arc<dyn SourceAdapter>>) -> SyncResult<Self> {
        Self::build(config, adapters, None)
    }

    /// Build an engine that also listens on a push channel
    pub fn with_push_channel(
        config: SyncConfig,
        adapters: HashMap<BackendKind, Arc<dyn SourceAdapter>>,
        channel: Arc<dyn PushChannel>,
    ) -> SyncResult<Self> {
        Self::build(config, adapters, Some(channel))
    }

    /// Build the HTTP adapters described by a bootstrap configuration
    pub fn from_config(config: &TomlConfig) -> SyncResult<Self> {
        let timeout = config.sync.attempt_timeout();
        let mut adapters: HashMap<BackendKind, Arc<dyn SourceAdapter>> = HashMap::new();

        if let (Some(url), Some(key)) = (&config.primary.url, &config.primary.api_key) {
            let adapter = PrimaryAdapter::new(url, key, config.sync.current_user_id.clone(), timeout)?;
            adapters.insert(BackendKind::Primary, Arc::new(adapter));
        }
        if let Some(url) = &config.legacy.url {
            let adapter = LegacyAdapter::new(url, config.legacy.token.clone(), timeout)?;
            adapters.insert(BackendKind::Legacy, Arc::new(adapter));
        }

        if adapters.is_empty() {
            return Err(SyncError::InvalidInput(
                "no backend configured: set [primary] url and api_key or [legacy] url".to_string(),
            ));
        }
        Self::new(config.sync.clone(), adapters)
    }

    fn build(
        config: SyncConfig,
        adapters: HashMap<BackendKind, Arc<dyn SourceAdapter>>,
        channel: Option<Arc<dyn PushChannel>>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let timeout = config.attempt_timeout();
        let reader = FallbackRouter::from_order(&config.read_order, &adapters, timeout)?;
        let writer = FallbackRouter::from_order(&config.write_order, &adapters, timeout)?;
        let events = EventBus::new(config.event_capacity);

        info!(
            read_order = ?reader.adapter_names(),
            write_order = ?writer.adapter_names(),
            push = channel.is_some(),
            "Sync engine ready"
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                reconciler: ReconciliationPass::new(reader, events.clone()),
                applier: MutationApplier::new(writer, events.clone()),
                registry: StoreRegistry::new(),
                listener: channel.map(ChangeListener::new),
                events,
                config,
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Attach a scope to the collection of (project, entity type)
    ///
    /// Runs the opening reconciliation pass before returning, then delivers
    /// changes by push or by polling until the scope is torn down.
    pub async fn open_scope(&self, project_id: &str, entity_type: EntityType) -> SyncResult<SyncScope> {
        if project_id.trim().is_empty() {
            return Err(SyncError::InvalidInput("project id must not be empty".to_string()));
        }
        SyncScope::open(Arc::clone(&self.shared), ScopeKey::new(project_id, entity_type)).await
    }

    /// Apply an optimistic mutation to an open collection
    pub async fn apply(
        &self,
        project_id: &str,
        entity_type: EntityType,
        kind: MutationKind,
        payload: Record,
    ) -> SyncResult<MutationTicket> {
        let collection = self.attached(project_id, entity_type).await?;
        self.shared.applier.apply(&collection, kind, payload).await
    }

    /// Run one reconciliation pass now
    pub async fn reconcile(&self, project_id: &str, entity_type: EntityType) -> SyncResult<MergeOutcome> {
        let collection = self.attached(project_id, entity_type).await?;
        self.shared.reconciler.run(&collection).await
    }

    /// Current contents of an open collection
    pub async fn snapshot(&self, project_id: &str, entity_type: EntityType) -> Option<Vec<Entity>> {
        let key = ScopeKey::new(project_id, entity_type);
        let collection = self.shared.registry.get(&key).await?;
        let entities = collection.read().await.entities();
        Some(entities)
    }

    /// Number of scopes attached to (project, entity type)
    pub async fn scope_count(&self, project_id: &str, entity_type: EntityType) -> usize {
        self.shared
            .registry
            .scope_count(&ScopeKey::new(project_id, entity_type))
            .await
    }

    async fn attached(&self, project_id: &str, entity_type: EntityType) -> SyncResult<SharedCollection> {
        let key = ScopeKey::new(project_id, entity_type);
        self.shared
            .registry
            .get(&key)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("no open scope for {}", key)))
    }
}
