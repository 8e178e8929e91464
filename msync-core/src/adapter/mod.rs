//! Source Adapters
//!
//! A Source Adapter wraps one concrete backend behind a uniform CRUD
//! capability set. Adapters are stateless beyond their connection settings
//! and never retry: retry/fallback belongs to the `FallbackRouter`.
//!
//! Implementations:
//! - `PrimaryAdapter`: hosted database REST surface
//! - `LegacyAdapter`: legacy workspace REST API
//! - `MemoryAdapter`: in-process backend with fault injection (tests, demos)

mod http;
pub mod legacy;
pub mod memory;
pub mod primary;

pub use legacy::LegacyAdapter;
pub use memory::{CallCounts, Fault, MemoryAdapter};
pub use primary::PrimaryAdapter;

use crate::entity::{Entity, Record};
use crate::error::SourceError;
use msync_common::ScopeKey;

/// Uniform CRUD capability over one backend
///
/// Every method either succeeds or fails with exactly one of
/// `Unreachable`, `Rejected`, `Malformed`. Returned entities are already
/// normalized and `Confirmed`.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name for logs and provenance (e.g. "primary")
    fn name(&self) -> &str;

    /// Full authoritative collection of one scope
    async fn fetch(&self, key: &ScopeKey) -> Result<Vec<Entity>, SourceError>;

    /// One entity by id
    ///
    /// The default implementation filters the full collection. A reachable
    /// backend that has no such record answers `Rejected`, so the router
    /// does not ask the next source.
    async fn fetch_one(&self, key: &ScopeKey, id: &str) -> Result<Entity, SourceError> {
        self.fetch(key)
            .await?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| SourceError::rejected(self.name(), format!("{} {} not found", key.entity_type, id)))
    }

    /// Create a record; the backend assigns the authoritative id
    async fn create(&self, key: &ScopeKey, payload: &Record) -> Result<Entity, SourceError>;

    /// Patch a record and return its new authoritative state
    async fn update(&self, key: &ScopeKey, id: &str, patch: &Record) -> Result<Entity, SourceError>;

    /// Delete a record
    async fn remove(&self, key: &ScopeKey, id: &str) -> Result<(), SourceError>;
}
