//! Detection pipeline engine.
//!
//! Frames arrive on a bounded mpsc channel; the loop picks the primary
//! subject and spawns one task per detection. Tasks overlap freely and
//! complete in any order — only the steps inside a single resolution are
//! ordered. Closing the channel stops the loop; in-flight tasks finish on
//! their own and tolerate a torn-down consumer.

use std::sync::Arc;

use lookout_core::{
    CaptureGuard, CaptureOutcome, DetectionFrame, IdentityResolver, VisualContextBus,
};
use tokio::sync::mpsc;

/// The wired-up per-frame processing path.
pub struct Pipeline {
    resolver: IdentityResolver,
    capture: CaptureGuard,
    bus: Arc<VisualContextBus>,
}

impl Pipeline {
    pub fn new(resolver: IdentityResolver, capture: CaptureGuard, bus: Arc<VisualContextBus>) -> Self {
        Self {
            resolver,
            capture,
            bus,
        }
    }

    /// Process one detection frame to completion: resolve the primary face,
    /// publish the snapshot, and capture a headshot for a first sighting.
    pub async fn process_frame(&self, frame: DetectionFrame) {
        let Some(face) = frame.primary_face() else {
            return;
        };
        let Some(embedding) = face.embedding.as_deref() else {
            return;
        };

        let resolution = match self.resolver.resolve(embedding).await {
            Ok(resolution) => resolution,
            Err(err) => {
                tracing::warn!(error = %err, "resolution failed; skipping frame");
                return;
            }
        };

        self.bus.update(resolution.snapshot());

        if resolution.matched_existing {
            return;
        }
        let Some(image) = frame.image.as_ref() else {
            tracing::debug!(
                identity_id = %resolution.identity.id,
                "no frame image attached; identity stays without a headshot until one is supplied"
            );
            return;
        };
        match self
            .capture
            .attempt_capture(&resolution.identity.id, image, &face.bbox)
            .await
        {
            CaptureOutcome::Uploaded { url } => {
                tracing::info!(identity_id = %resolution.identity.id, url = %url, "headshot saved");
            }
            CaptureOutcome::AlreadyCaptured => {}
            CaptureOutcome::Unlinked { url, error } => {
                tracing::warn!(
                    identity_id = %resolution.identity.id,
                    url = %url,
                    error = %error,
                    "headshot uploaded but not linked"
                );
            }
            CaptureOutcome::Failed { error } => {
                tracing::warn!(identity_id = %resolution.identity.id, error = %error, "headshot capture failed");
            }
        }
    }
}

/// Clone-safe handle for submitting detection frames.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<DetectionFrame>,
}

impl PipelineHandle {
    /// Non-blocking submit. Returns false when the queue is full and the
    /// frame was dropped — the next frame carries fresher state anyway.
    pub fn submit(&self, frame: DetectionFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("frame queue full; dropping detection frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("pipeline stopped; dropping detection frame");
                false
            }
        }
    }
}

/// Spawn the engine loop. Each accepted frame is processed on its own task
/// so a slow store round-trip never blocks the intake of the next frame.
pub fn spawn_pipeline(pipeline: Arc<Pipeline>, queue_depth: usize) -> PipelineHandle {
    let (tx, mut rx) = mpsc::channel::<DetectionFrame>(queue_depth.max(1));

    tokio::spawn(async move {
        tracing::info!("pipeline engine started");
        while let Some(frame) = rx.recv().await {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline.process_frame(frame).await;
            });
        }
        tracing::info!("pipeline engine stopped");
    });

    PipelineHandle { tx }
}
