//! D-Bus interface for the Lookout daemon.
//!
//! Bus name: io.lookout.Lookout1
//! Object path: /io/lookout/Lookout1
//!
//! The detection collaborator pushes frames through `SubmitDetection`; the
//! voice-agent runtime calls the `GetVisualContext` / `UpdateIdentity`
//! tools and listens for the `ContextUpdate` signal carrying debounced
//! notifications.

use std::sync::Arc;

use chrono::Utc;
use lookout_core::import::CsvImporter;
use lookout_core::store::{EventFilter, IdentityPatch, IdentityStore};
use lookout_core::types::{DetectedFace, DetectionFrame, FrameImage};
use lookout_core::{EventLog, VisualContextBus};
use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::engine::PipelineHandle;

pub const BUS_NAME: &str = "io.lookout.Lookout1";
pub const OBJECT_PATH: &str = "/io/lookout/Lookout1";

/// Sentinel returned by the visual-context tool when nobody is observed.
const NOBODY_VISIBLE: &str = "I don't see anyone clearly right now.";

pub struct LookoutService {
    pipeline: PipelineHandle,
    bus: Arc<VisualContextBus>,
    identities: Arc<dyn IdentityStore>,
    events: EventLog,
    importer: Arc<CsvImporter>,
}

impl LookoutService {
    pub fn new(
        pipeline: PipelineHandle,
        bus: Arc<VisualContextBus>,
        identities: Arc<dyn IdentityStore>,
        events: EventLog,
        importer: Arc<CsvImporter>,
    ) -> Self {
        Self {
            pipeline,
            bus,
            identities,
            events,
            importer,
        }
    }
}

#[interface(name = "io.lookout.Lookout1")]
impl LookoutService {
    /// Submit one detection frame. `rgb` may be empty when the producer has
    /// no frame pixels to share; headshot capture is then skipped.
    /// Returns false when the frame was dropped (queue full or malformed).
    async fn submit_detection(
        &self,
        width: u32,
        height: u32,
        rgb: Vec<u8>,
        faces_json: &str,
    ) -> bool {
        let faces: Vec<DetectedFace> = match serde_json::from_str(faces_json) {
            Ok(faces) => faces,
            Err(err) => {
                tracing::warn!(error = %err, "malformed faces payload; dropping frame");
                return false;
            }
        };
        let image = if rgb.is_empty() {
            None
        } else {
            Some(FrameImage {
                data: rgb,
                width,
                height,
            })
        };
        self.pipeline.submit(DetectionFrame { image, faces })
    }

    /// Agent tool: the current visual-context snapshot, or a sentinel when
    /// nobody is visible.
    async fn get_visual_context(&self) -> String {
        let Some(snapshot) = self.bus.current() else {
            return NOBODY_VISIBLE.to_string();
        };
        let last_seen_seconds_ago =
            (Utc::now() - snapshot.last_seen).num_milliseconds() as f64 / 1000.0;
        serde_json::json!({
            "id": snapshot.id,
            "name": snapshot.name.as_deref().unwrap_or("Unknown Person"),
            "status": snapshot.relationship_status.as_deref().unwrap_or("Unknown"),
            "last_seen_seconds_ago": last_seen_seconds_ago,
            "is_match": snapshot.found,
        })
        .to_string()
    }

    /// Agent tool: partial identity correction. Empty strings leave the
    /// field unchanged.
    async fn update_identity(
        &self,
        identity_id: &str,
        name: &str,
        relationship_status: &str,
    ) -> String {
        let patch = IdentityPatch {
            name: (!name.is_empty()).then(|| name.to_string()),
            relationship_status: (!relationship_status.is_empty())
                .then(|| relationship_status.to_string()),
            headshot_media_url: None,
        };
        if patch.is_empty() {
            return "Failed to update identity.".to_string();
        }
        match self.identities.update_identity(identity_id, patch).await {
            Ok(identity) => {
                tracing::info!(identity_id = %identity.id, name = %identity.name, "identity updated via agent tool");
                "Identity updated successfully.".to_string()
            }
            Err(err) => {
                tracing::warn!(error = %err, identity_id, "identity update failed");
                "Failed to update identity.".to_string()
            }
        }
    }

    /// Bulk-import identities from CSV content; returns a JSON summary.
    async fn import_contacts(&self, csv: &str) -> String {
        let result = self.importer.import(csv).await;
        tracing::info!(
            processed = result.processed,
            created = result.created,
            skipped = result.skipped,
            "csv import finished"
        );
        serde_json::to_string(&result).unwrap_or_else(|_| "{}".to_string())
    }

    /// One identity as JSON.
    async fn get_identity(&self, identity_id: &str) -> zbus::fdo::Result<String> {
        let identity = self
            .identities
            .get_identity(identity_id)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(serde_json::to_string(&identity).unwrap_or_else(|_| "{}".to_string()))
    }

    /// All identities as JSON, newest first.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self
            .identities
            .list_identities()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(serde_json::to_string(&identities).unwrap_or_else(|_| "[]".to_string()))
    }

    /// Recent audit events as JSON, newest first. Empty filter strings
    /// match everything; a zero limit means no limit.
    async fn recent_events(
        &self,
        session_id: &str,
        identity_id: &str,
        limit: u32,
    ) -> zbus::fdo::Result<String> {
        let filter = EventFilter {
            session_id: (!session_id.is_empty()).then(|| session_id.to_string()),
            identity_id: (!identity_id.is_empty()).then(|| identity_id.to_string()),
            limit: (limit > 0).then_some(limit),
        };
        let events = self
            .events
            .recent(filter)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(serde_json::to_string(&events).unwrap_or_else(|_| "[]".to_string()))
    }

    /// Daemon status information.
    async fn status(&self) -> String {
        let observing = self.bus.current().map(|s| s.found).unwrap_or(false);
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "observing_match": observing,
        })
        .to_string()
    }

    /// Debounced visual-context notification for the agent runtime.
    #[zbus(signal)]
    pub async fn context_update(emitter: &SignalEmitter<'_>, message: &str) -> zbus::Result<()>;
}
