//! Entity type catalogue and scope keys
//!
//! Every synchronized collection is partitioned by `(project_id, entity_type)`.
//! The catalogue below records, per entity type, where each backend keeps it
//! and whether the hosted database publishes change notifications for it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Synchronized domain object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Message,
    VoiceNote,
    Session,
    Stakeholder,
    ImpactStory,
    CommunityEvent,
    Certificate,
    Deliverable,
    Recording,
}

impl EntityType {
    /// All entity types, in catalogue order
    pub const ALL: [EntityType; 10] = [
        EntityType::Task,
        EntityType::Message,
        EntityType::VoiceNote,
        EntityType::Session,
        EntityType::Stakeholder,
        EntityType::ImpactStory,
        EntityType::CommunityEvent,
        EntityType::Certificate,
        EntityType::Deliverable,
        EntityType::Recording,
    ];

    /// Table name in the hosted database
    pub fn table(self) -> &'static str {
        match self {
            EntityType::Task => "tasks",
            EntityType::Message => "messages",
            EntityType::VoiceNote => "voice_notes",
            EntityType::Session => "sessions",
            EntityType::Stakeholder => "stakeholders",
            EntityType::ImpactStory => "impact_stories",
            EntityType::CommunityEvent => "community_events",
            EntityType::Certificate => "certificates",
            EntityType::Deliverable => "deliverables",
            EntityType::Recording => "recordings",
        }
    }

    /// Path segment under `/workspace/{project_id}/` on the legacy REST API
    pub fn legacy_path(self) -> &'static str {
        match self {
            EntityType::Task => "tasks",
            EntityType::Message => "messages",
            EntityType::VoiceNote => "voice-notes",
            EntityType::Session => "sessions",
            EntityType::Stakeholder => "stakeholders",
            EntityType::ImpactStory => "impact-stories",
            EntityType::CommunityEvent => "community-events",
            EntityType::Certificate => "certificates",
            EntityType::Deliverable => "deliverables",
            EntityType::Recording => "recordings",
        }
    }

    /// Whether the hosted database publishes change notifications for this type
    ///
    /// Types without a push channel are kept fresh by the polling timer.
    pub fn has_push_channel(self) -> bool {
        !matches!(
            self,
            EntityType::Certificate | EntityType::Deliverable | EntityType::Recording
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Task => "task",
            EntityType::Message => "message",
            EntityType::VoiceNote => "voice_note",
            EntityType::Session => "session",
            EntityType::Stakeholder => "stakeholder",
            EntityType::ImpactStory => "impact_story",
            EntityType::CommunityEvent => "community_event",
            EntityType::Certificate => "certificate",
            EntityType::Deliverable => "deliverable",
            EntityType::Recording => "recording",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityType {
    type Err = Error;

    /// Accepts the singular name, the table name or the legacy path segment
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        EntityType::ALL
            .into_iter()
            .find(|t| t.to_string() == wanted || t.table() == wanted)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown entity type: {}", s)))
    }
}

/// Lifecycle of one entity instance in a local collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Optimistically applied, not yet confirmed by any backend
    Pending,
    /// Accepted by a backend (or delivered by a reconciliation pass)
    Confirmed,
    /// Rejected; about to be rolled back
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Pending => write!(f, "pending"),
            LifecycleState::Confirmed => write!(f, "confirmed"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of user mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Partition key of one collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    pub project_id: String,
    pub entity_type: EntityType,
}

impl ScopeKey {
    pub fn new(project_id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            project_id: project_id.into(),
            entity_type,
        }
    }
}

impl fmt::Display for ScopeKey {
    /// Same shape as the push channel names: `{table}:{project_id}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type.table(), self.project_id)
    }
}
