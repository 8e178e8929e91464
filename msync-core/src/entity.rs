//! Synchronized entity representation
//!
//! Every backend record is normalized into one canonical `Entity` shape at the
//! Source Adapter boundary (see `normalize`); nothing past the adapters looks at
//! backend-specific field names.

use msync_common::uuid_utils;
use msync_common::{EntityType, LifecycleState, ScopeKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field map of a record (canonical camelCase keys)
pub type Record = serde_json::Map<String, Value>;

/// One synchronized domain object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Authoritative id, or a provisional id until promotion
    pub id: String,
    /// Scope key; collections are partitioned by it
    pub project_id: String,
    pub entity_type: EntityType,
    pub lifecycle: LifecycleState,
    /// Last known server fields (or the optimistic payload while pending)
    pub fields: Record,
}

impl Entity {
    /// Confirmed entity as delivered by a backend
    pub fn confirmed(key: &ScopeKey, id: impl Into<String>, fields: Record) -> Self {
        Self {
            id: id.into(),
            project_id: key.project_id.clone(),
            entity_type: key.entity_type,
            lifecycle: LifecycleState::Confirmed,
            fields,
        }
    }

    /// Optimistic entity with a freshly minted provisional id
    pub fn provisional(key: &ScopeKey, fields: Record) -> Self {
        Self {
            id: uuid_utils::provisional_id(),
            project_id: key.project_id.clone(),
            entity_type: key.entity_type,
            lifecycle: LifecycleState::Pending,
            fields,
        }
    }

    pub fn is_provisional(&self) -> bool {
        uuid_utils::is_provisional(&self.id)
    }

    pub fn is_pending(&self) -> bool {
        self.lifecycle == LifecycleState::Pending
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String value of a field, if it is a string
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Shallow-merge `patch` into the fields
    pub fn apply_patch(&mut self, patch: &Record) {
        for (k, v) in patch {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    /// Same id and same server fields, ignoring lifecycle
    pub fn same_content(&self, other: &Entity) -> bool {
        self.id == other.id && self.fields == other.fields
    }
}
