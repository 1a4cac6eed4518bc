//! Append-only audit trail of sightings, notes and agent remarks.

use std::sync::Arc;

use crate::store::{Event, EventFilter, EventKind, EventStore, StoreError};

/// Thin append/read facade over the event store.
pub struct EventLog {
    store: Arc<dyn EventStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Append one typed event tied to a session and optionally an identity.
    pub async fn append(
        &self,
        session_id: Option<String>,
        kind: EventKind,
        content: impl Into<String>,
        related_identity_id: Option<String>,
    ) -> Result<Event, StoreError> {
        let content = content.into();
        let event = self
            .store
            .append_event(session_id, kind, content, related_identity_id)
            .await?;
        tracing::debug!(
            event_id = %event.id,
            kind = event.kind.as_str(),
            identity_id = event.related_identity_id.as_deref().unwrap_or("-"),
            "event appended"
        );
        Ok(event)
    }

    /// Events matching the filter, newest first.
    pub async fn recent(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        self.store.events(filter).await
    }
}
