//! Match-or-create identity resolution.
//!
//! This is the per-frame hot path: it must never panic past its boundary,
//! and every failure is either degraded (matcher, event log) or surfaced as
//! a typed error (identity/session writes).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::EventLog;
use crate::matcher::SimilarityMatcher;
use crate::session::SessionManager;
use crate::store::{EventKind, Identity, IdentityStore, NewIdentity, StoreError};
use crate::types::{Embedding, VisualSnapshot};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one resolution call.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// True when the embedding matched an existing identity; false when a
    /// placeholder identity was created for a first sighting.
    pub matched_existing: bool,
    pub identity: Identity,
    /// Similarity of the match; synthetically 1.0 for a freshly created
    /// identity.
    pub similarity: f32,
    pub session_id: String,
}

impl Resolution {
    /// Snapshot for the context bus. `found` mirrors `matched_existing`:
    /// a first sighting is reported as not-found with the new identity
    /// attached, which is what gates the capture guard downstream.
    pub fn snapshot(&self) -> VisualSnapshot {
        VisualSnapshot {
            found: self.matched_existing,
            id: Some(self.identity.id.clone()),
            name: Some(self.identity.name.clone()),
            relationship_status: self.identity.relationship_status.clone(),
            similarity: Some(self.similarity),
            last_seen: Utc::now(),
        }
    }
}

/// Orchestrates session lookup, matching, identity creation and the audit
/// trail for one embedding observation.
pub struct IdentityResolver {
    identities: Arc<dyn IdentityStore>,
    sessions: SessionManager,
    events: EventLog,
    matcher: SimilarityMatcher,
}

impl IdentityResolver {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        sessions: SessionManager,
        events: EventLog,
        matcher: SimilarityMatcher,
    ) -> Self {
        Self {
            identities,
            sessions,
            events,
            matcher,
        }
    }

    /// Resolve one embedding observation to an identity.
    ///
    /// Strictly ordered: active session, then match, then either a sighting
    /// event (match) or identity creation followed by a first-sighting
    /// event. Exactly one identity create XOR zero, and at most one event
    /// append, per call. A failed event append is logged and does not undo
    /// the resolution decision already made.
    pub async fn resolve(&self, raw_embedding: &[f32]) -> Result<Resolution, ResolveError> {
        let session = self.sessions.get_or_create_active().await?;
        let probe = Embedding::canonical(raw_embedding);

        if let Some(found) = self.matcher.match_embedding(&probe).await {
            let status = found
                .identity
                .relationship_status
                .as_deref()
                .unwrap_or("Unknown");
            let content = format!("Recognized {} ({status})", found.identity.name);
            self.append_observation(&session.id, content, &found.identity.id)
                .await;

            return Ok(Resolution {
                matched_existing: true,
                identity: found.identity,
                similarity: found.similarity,
                session_id: session.id,
            });
        }

        // No match: fabricate a placeholder identity for the first sighting.
        let name = placeholder_name(Utc::now());
        let identity = self
            .identities
            .create_identity(NewIdentity {
                name: name.clone(),
                relationship_status: Some("New".into()),
                face_embedding: Some(probe),
                headshot_media_url: None,
                metadata: serde_json::json!({ "created_via": "visual_scan" }),
            })
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "identity creation failed");
                err
            })?;

        tracing::info!(identity_id = %identity.id, name = %identity.name, "created placeholder identity");

        let content = format!("First sighting of {name}");
        self.append_observation(&session.id, content, &identity.id)
            .await;

        Ok(Resolution {
            matched_existing: false,
            identity,
            similarity: 1.0,
            session_id: session.id,
        })
    }

    async fn append_observation(&self, session_id: &str, content: String, identity_id: &str) {
        if let Err(err) = self
            .events
            .append(
                Some(session_id.to_string()),
                EventKind::VisualObservation,
                content,
                Some(identity_id.to_string()),
            )
            .await
        {
            tracing::warn!(error = %err, identity_id, "sighting event append failed");
        }
    }
}

/// Placeholder name for an auto-created identity, derived from wall-clock
/// time: `New Contact 2026-08-25 14:03:22`.
fn placeholder_name(now: DateTime<Utc>) -> String {
    format!("New Contact {}", now.format("%Y-%m-%d %H:%M:%S"))
}
