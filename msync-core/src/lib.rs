//! # msync core
//!
//! Dual-backend synchronization core:
//! - Source Adapters over the hosted database and the legacy REST API
//! - Fallback Router (priority order, bounded attempts)
//! - Optimistic Mutation Applier (stage, confirm or roll back)
//! - Change Notification Listener and Polling Fallback Timer
//! - Reconciliation Pass merging full snapshots into per-scope collections
//!
//! `SyncEngine` wires these together; `SyncScope` is one consumer's handle on
//! a (project, entity type) collection.

pub mod adapter;
pub mod applier;
pub mod engine;
pub mod entity;
pub mod error;
pub mod listener;
pub mod normalize;
pub mod poller;
pub mod reconcile;
pub mod router;
pub mod scope;
pub mod store;

pub use adapter::SourceAdapter;
pub use applier::{MutationOutcome, MutationTicket};
pub use engine::SyncEngine;
pub use entity::{Entity, Record};
pub use error::{SourceError, SyncError, SyncResult};
pub use listener::{ChangeKind, ChangeListener, LocalPushChannel, PushChannel, SubscriptionHandle};
pub use router::{FallbackRouter, Routed};
pub use scope::{DeliveryMode, SyncScope};
pub use store::{Collection, MergeOutcome};
