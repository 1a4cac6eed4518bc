//! Store traits and persistent record types.
//!
//! The pipeline talks to persistence exclusively through these traits;
//! `lookout-store` provides the SQLite + filesystem implementations and
//! tests swap in in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// A persistent record representing a recognized person.
///
/// Created once by the resolver (auto-detection) or by bulk import; mutated
/// later by name/status correction or by the capture guard linking a
/// headshot; never deleted by this pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub relationship_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_embedding: Option<Embedding>,
    pub headshot_media_url: Option<String>,
    /// Open provenance map, e.g. `{"created_via": "visual_scan"}`.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating an identity. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, Default)]
pub struct NewIdentity {
    pub name: String,
    pub relationship_status: Option<String>,
    pub face_embedding: Option<Embedding>,
    pub headshot_media_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// Partial identity update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct IdentityPatch {
    pub name: Option<String>,
    pub relationship_status: Option<String>,
    pub headshot_media_url: Option<String>,
}

impl IdentityPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.relationship_status.is_none() && self.headshot_media_url.is_none()
    }
}

/// A bounded recording interval grouping events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the session is active.
    pub ended_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
}

/// Audit event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    VisualObservation,
    ConversationNote,
    AgentWhisper,
    Notes,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::VisualObservation => "VISUAL_OBSERVATION",
            EventKind::ConversationNote => "CONVERSATION_NOTE",
            EventKind::AgentWhisper => "AGENT_WHISPER",
            EventKind::Notes => "NOTES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VISUAL_OBSERVATION" => Some(EventKind::VisualObservation),
            "CONVERSATION_NOTE" => Some(EventKind::ConversationNote),
            "AGENT_WHISPER" => Some(EventKind::AgentWhisper),
            "NOTES" => Some(EventKind::Notes),
            _ => None,
        }
    }
}

/// An immutable audit-log entry. Append-only; never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub session_id: Option<String>,
    pub kind: EventKind,
    pub content: String,
    pub related_identity_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event query filter. All fields optional; events come back newest first.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub identity_id: Option<String>,
    pub limit: Option<u32>,
}

/// Identity persistence with nearest-neighbor query support.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError>;

    async fn get_identity(&self, id: &str) -> Result<Identity, StoreError>;

    /// Newest first.
    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    async fn update_identity(&self, id: &str, patch: IdentityPatch) -> Result<Identity, StoreError>;

    /// Single closest identity by cosine similarity, with the similarity
    /// clamped to [0, 1]. `None` when no identity has an embedding.
    async fn nearest_identity(
        &self,
        probe: &Embedding,
    ) -> Result<Option<(Identity, f32)>, StoreError>;
}

/// Session persistence.
///
/// `create_session` must be an atomic upsert with respect to the single
/// active session: if an active session already exists when the insert is
/// attempted, the existing one is returned instead of a second active row
/// being created.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Newest active session (`ended_at IS NULL`), if any.
    async fn active_session(&self) -> Result<Option<Session>, StoreError>;

    async fn create_session(&self, title: Option<String>) -> Result<Session, StoreError>;

    async fn end_session(&self, id: &str) -> Result<Session, StoreError>;
}

/// Append-only event persistence.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_event(
        &self,
        session_id: Option<String>,
        kind: EventKind,
        content: String,
        related_identity_id: Option<String>,
    ) -> Result<Event, StoreError>;

    async fn events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError>;
}

/// Binary blob storage for headshot images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `name` and return a public URL for the object.
    async fn put_object(
        &self,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;
}
