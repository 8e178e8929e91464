//! # msync common library
//!
//! Shared code for the synchronization core and its binary:
//! - Configuration loading (`SyncConfig`, `TomlConfig`)
//! - Error type
//! - Event types (`SyncEvent`) and the `EventBus`
//! - Entity type catalogue and scope keys
//! - Id and time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use model::{EntityType, LifecycleState, MutationKind, ScopeKey};
