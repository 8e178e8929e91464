//! Per-entity-type record normalization
//!
//! Backends deliver the same record under different field names: the hosted
//! database uses snake_case columns, the legacy API camelCase, and a few
//! entity types carry historical aliases (`sender` vs `senderName`). Both
//! adapters run every record through [`normalize_record`] so the rest of the
//! core sees exactly one canonical shape.

use crate::entity::{Entity, Record};
use crate::error::SourceError;
use msync_common::{EntityType, ScopeKey};
use serde_json::Value;

/// Aliases collapsed onto a canonical field name (after camelCase conversion)
fn aliases(entity_type: EntityType) -> &'static [(&'static str, &'static str)] {
    match entity_type {
        EntityType::Message => &[
            ("sender", "senderName"),
            ("avatar", "senderAvatar"),
            ("message", "content"),
            ("text", "content"),
        ],
        EntityType::VoiceNote => &[("sender", "senderName"), ("avatar", "senderAvatar")],
        EntityType::Recording => &[("path", "url"), ("fileUrl", "url")],
        EntityType::Deliverable => &[("submittedAt", "submittedDate")],
        EntityType::Session | EntityType::CommunityEvent => &[("date", "scheduledDate")],
        _ => &[],
    }
}

/// `due_date` → `dueDate`; already-camel keys are returned unchanged
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for (i, c) in key.chars().enumerate() {
        if c == '_' && i > 0 {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `dueDate` → `due_date`
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert an outgoing canonical payload to the hosted database's column names
pub fn to_snake_case_record(record: &Record) -> Record {
    record
        .iter()
        .map(|(k, v)| (camel_to_snake(k), v.clone()))
        .collect()
}

/// Canonicalize keys of a raw object
///
/// When a record carries both spellings of one field the camelCase spelling
/// wins, independent of map iteration order.
fn canonical_fields(raw: serde_json::Map<String, Value>) -> Record {
    let mut fields = Record::new();
    let mut converted = Vec::new();
    for (k, v) in raw {
        let camel = snake_to_camel(&k);
        if camel == k {
            fields.insert(k, v);
        } else {
            converted.push((camel, v));
        }
    }
    for (k, v) in converted {
        fields.entry(k).or_insert(v);
    }
    fields
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalize one raw backend record into a confirmed entity of `key`'s scope
pub fn normalize_record(key: &ScopeKey, raw: Value, adapter: &str) -> Result<Entity, SourceError> {
    let object = match raw {
        Value::Object(map) => map,
        other => {
            return Err(SourceError::malformed(
                adapter,
                format!("expected a {} record object, got {}", key.entity_type, json_kind(&other)),
            ))
        }
    };

    let mut fields = canonical_fields(object);

    for (alias, canonical) in aliases(key.entity_type) {
        if let Some(value) = fields.remove(*alias) {
            fields.entry(canonical.to_string()).or_insert(value);
        }
    }

    let id = match fields.remove("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(SourceError::malformed(
                adapter,
                format!("{} id must be a non-empty string or number, got {}", key.entity_type, json_kind(&other)),
            ))
        }
        None => {
            return Err(SourceError::malformed(
                adapter,
                format!("{} record has no id", key.entity_type),
            ))
        }
    };

    match fields.remove("projectId") {
        None | Some(Value::Null) => {}
        Some(Value::String(p)) if p == key.project_id => {}
        Some(other) => {
            return Err(SourceError::malformed(
                adapter,
                format!("{} {} belongs to project {} not {}", key.entity_type, id, other, key.project_id),
            ))
        }
    }

    Ok(Entity::confirmed(key, id, fields))
}

/// Normalize a collection response
///
/// `null` is an empty collection (the legacy API answers `null` for empty
/// workspaces); anything other than an array is malformed.
pub fn normalize_collection(key: &ScopeKey, raw: Value, adapter: &str) -> Result<Vec<Entity>, SourceError> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| normalize_record(key, item, adapter))
            .collect(),
        other => Err(SourceError::malformed(
            adapter,
            format!("expected a {} array, got {}", key.entity_type, json_kind(&other)),
        )),
    }
}
