//! At-most-once headshot capture for newly created identities.
//!
//! The guard reserves the identity ID *before* any asynchronous work
//! (mark-then-act), which closes the race where two detections of the same
//! still-unresolved face both trigger a capture before the first upload
//! round-trip completes. A failed attempt releases the reservation so a
//! later sighting can retry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use thiserror::Error;

use crate::store::{BlobStore, IdentityPatch, IdentityStore};
use crate::types::{BoundingBox, FrameImage};

/// Padding added around the face box on each side, as a fraction of the
/// box width/height.
pub const HEADSHOT_PADDING: f32 = 0.2;

/// JPEG quality for encoded headshots.
pub const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame data does not match its dimensions ({width}x{height}, {len} bytes)")]
    InvalidFrame { width: u32, height: u32, len: usize },
    #[error("crop region is empty")]
    EmptyCrop,
    #[error("jpeg encode: {0}")]
    Encode(#[from] image::ImageError),
}

/// Outcome of a capture attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Headshot uploaded and linked to the identity.
    Uploaded { url: String },
    /// A capture for this identity is already done, in flight, or persisted
    /// on the record; nothing was uploaded.
    AlreadyCaptured,
    /// Partial success: the blob exists but linking it to the identity
    /// failed. Not retried, since re-uploading would duplicate the asset.
    Unlinked { url: String, error: String },
    /// Nothing durable happened; a later sighting may retry.
    Failed { error: String },
}

/// Guards headshot capture so each identity gets at most one concurrently
/// in-flight attempt and at most one successful upload.
pub struct CaptureGuard {
    identities: Arc<dyn IdentityStore>,
    blobs: Arc<dyn BlobStore>,
    attempted: Mutex<HashSet<String>>,
}

impl CaptureGuard {
    pub fn new(identities: Arc<dyn IdentityStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            identities,
            blobs,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    /// Crop, encode, upload and link a headshot for a newly created
    /// identity. Invoked only for first sightings, never for matches.
    pub async fn attempt_capture(
        &self,
        identity_id: &str,
        frame: &FrameImage,
        bbox: &BoundingBox,
    ) -> CaptureOutcome {
        // Reserve before any await point.
        {
            let mut attempted = self.attempted.lock().expect("capture set poisoned");
            if !attempted.insert(identity_id.to_string()) {
                tracing::debug!(identity_id, "capture already attempted; skipping");
                return CaptureOutcome::AlreadyCaptured;
            }
        }

        // The reservation set is process-local; the identity record is the
        // durable marker. A restart must not re-capture a linked headshot.
        match self.identities.get_identity(identity_id).await {
            Ok(identity) if identity.headshot_media_url.is_some() => {
                tracing::debug!(identity_id, "headshot already linked; skipping");
                return CaptureOutcome::AlreadyCaptured;
            }
            Ok(_) => {}
            Err(err) => {
                // Proceed: an unreachable store here should not forfeit the
                // frame we already have in hand.
                tracing::warn!(error = %err, identity_id, "headshot pre-check failed; capturing anyway");
            }
        }

        let jpeg = match encode_headshot(frame, bbox) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                tracing::warn!(error = %err, identity_id, "headshot encode failed");
                self.release(identity_id);
                return CaptureOutcome::Failed {
                    error: err.to_string(),
                };
            }
        };

        let name = format!("{identity_id}-{}.jpg", Utc::now().timestamp_millis());
        let url = match self.blobs.put_object(&name, jpeg, "image/jpeg").await {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(error = %err, identity_id, "headshot upload failed");
                self.release(identity_id);
                return CaptureOutcome::Failed {
                    error: err.to_string(),
                };
            }
        };

        let patch = IdentityPatch {
            headshot_media_url: Some(url.clone()),
            ..Default::default()
        };
        match self.identities.update_identity(identity_id, patch).await {
            Ok(_) => {
                tracing::info!(identity_id, url = %url, "headshot captured");
                CaptureOutcome::Uploaded { url }
            }
            Err(err) => {
                // The blob exists; keep the reservation so we do not upload
                // a duplicate on the next sighting.
                tracing::warn!(error = %err, identity_id, url = %url, "headshot uploaded but identity update failed");
                CaptureOutcome::Unlinked {
                    url,
                    error: err.to_string(),
                }
            }
        }
    }

    fn release(&self, identity_id: &str) {
        self.attempted
            .lock()
            .expect("capture set poisoned")
            .remove(identity_id);
    }
}

/// Compute the padded crop region, clamped to frame bounds.
///
/// Mirrors the capture geometry used at detection time: 20% of the box
/// width/height added on each side.
pub fn crop_region(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
    let x = (bbox.x - bbox.width * HEADSHOT_PADDING).max(0.0);
    let y = (bbox.y - bbox.height * HEADSHOT_PADDING).max(0.0);
    let width = (bbox.width * (1.0 + HEADSHOT_PADDING * 2.0)).min(frame_width as f32 - x);
    let height = (bbox.height * (1.0 + HEADSHOT_PADDING * 2.0)).min(frame_height as f32 - y);

    (
        x as u32,
        y as u32,
        width.max(0.0) as u32,
        height.max(0.0) as u32,
    )
}

/// Crop the frame to the padded face region and encode as JPEG.
fn encode_headshot(frame: &FrameImage, bbox: &BoundingBox) -> Result<Vec<u8>, CaptureError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(CaptureError::InvalidFrame {
            width: frame.width,
            height: frame.height,
            len: frame.data.len(),
        });
    }

    let image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(
        CaptureError::InvalidFrame {
            width: frame.width,
            height: frame.height,
            len: frame.data.len(),
        },
    )?;

    let (x, y, width, height) = crop_region(bbox, frame.width, frame.height);
    if width == 0 || height == 0 {
        return Err(CaptureError::EmptyCrop);
    }

    let cropped = image::imageops::crop_imm(&image, x, y, width, height).to_image();

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder.encode(
        cropped.as_raw(),
        cropped.width(),
        cropped.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{identity, MemoryBlobStore, MemoryStore};
    use std::sync::atomic::Ordering;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    fn frame(width: u32, height: u32) -> FrameImage {
        FrameImage {
            data: vec![128; (width * height * 3) as usize],
            width,
            height,
        }
    }

    #[test]
    fn test_crop_region_adds_padding() {
        let (x, y, w, h) = crop_region(&bbox(100.0, 100.0, 100.0, 100.0), 640, 480);
        assert_eq!((x, y), (80, 80));
        assert_eq!((w, h), (140, 140));
    }

    #[test]
    fn test_crop_region_clamps_to_frame_origin() {
        let (x, y, _, _) = crop_region(&bbox(5.0, 5.0, 100.0, 100.0), 640, 480);
        assert_eq!((x, y), (0, 0));
    }

    #[test]
    fn test_crop_region_clamps_to_frame_extent() {
        let (x, _, w, _) = crop_region(&bbox(600.0, 0.0, 100.0, 100.0), 640, 480);
        assert_eq!(x, 580);
        assert_eq!(w, 60);
    }

    fn guard(store: Arc<MemoryStore>, blobs: Arc<MemoryBlobStore>) -> CaptureGuard {
        CaptureGuard::new(store, blobs)
    }

    #[tokio::test]
    async fn test_capture_uploads_and_links() {
        let store = Arc::new(MemoryStore::new().with_identity(identity("new", "New Contact", None)));
        let blobs = Arc::new(MemoryBlobStore::new());
        let g = guard(store.clone(), blobs.clone());

        let outcome = g
            .attempt_capture("new", &frame(320, 240), &bbox(50.0, 50.0, 80.0, 80.0))
            .await;
        let CaptureOutcome::Uploaded { url } = outcome else {
            panic!("expected upload, got {outcome:?}");
        };
        assert_eq!(blobs.upload_count(), 1);
        let linked = store.get_identity("new").await.unwrap();
        assert_eq!(linked.headshot_media_url.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn test_second_attempt_after_success_is_skipped() {
        let store = Arc::new(MemoryStore::new().with_identity(identity("new", "New Contact", None)));
        let blobs = Arc::new(MemoryBlobStore::new());
        let g = guard(store, blobs.clone());
        let f = frame(320, 240);
        let b = bbox(50.0, 50.0, 80.0, 80.0);

        assert!(matches!(
            g.attempt_capture("new", &f, &b).await,
            CaptureOutcome::Uploaded { .. }
        ));
        assert_eq!(g.attempt_capture("new", &f, &b).await, CaptureOutcome::AlreadyCaptured);
        assert_eq!(blobs.upload_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_captures_upload_once() {
        let store = Arc::new(MemoryStore::new().with_identity(identity("new", "New Contact", None)));
        let blobs = Arc::new(MemoryBlobStore::new());
        let g = Arc::new(guard(store, blobs.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = g.clone();
            handles.push(tokio::spawn(async move {
                g.attempt_capture("new", &frame(320, 240), &bbox(50.0, 50.0, 80.0, 80.0))
                    .await
            }));
        }

        let mut uploaded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                CaptureOutcome::Uploaded { .. } => uploaded += 1,
                CaptureOutcome::AlreadyCaptured => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(uploaded, 1);
        assert_eq!(blobs.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_allows_retry() {
        let store = Arc::new(MemoryStore::new().with_identity(identity("new", "New Contact", None)));
        let blobs = Arc::new(MemoryBlobStore::new());
        blobs.fail_next.store(true, Ordering::SeqCst);
        let g = guard(store, blobs.clone());
        let f = frame(320, 240);
        let b = bbox(50.0, 50.0, 80.0, 80.0);

        assert!(matches!(
            g.attempt_capture("new", &f, &b).await,
            CaptureOutcome::Failed { .. }
        ));
        assert_eq!(blobs.upload_count(), 0);

        assert!(matches!(
            g.attempt_capture("new", &f, &b).await,
            CaptureOutcome::Uploaded { .. }
        ));
        assert_eq!(blobs.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_persisted_headshot_suppresses_capture_after_restart() {
        let mut existing = identity("new", "New Contact", None);
        existing.headshot_media_url = Some("memory://headshots/new-1.jpg".into());
        let store = Arc::new(MemoryStore::new().with_identity(existing));
        let blobs = Arc::new(MemoryBlobStore::new());
        // Fresh guard simulates a process restart with an empty set.
        let g = guard(store, blobs.clone());

        let outcome = g
            .attempt_capture("new", &frame(320, 240), &bbox(50.0, 50.0, 80.0, 80.0))
            .await;
        assert_eq!(outcome, CaptureOutcome::AlreadyCaptured);
        assert_eq!(blobs.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_link_failure_reports_partial_success_and_does_not_retry() {
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let g = guard(store.clone(), blobs.clone());
        let f = frame(320, 240);
        let b = bbox(50.0, 50.0, 80.0, 80.0);

        // Identity missing entirely: pre-check warns, upload succeeds, the
        // patch fails. The blob exists, so the reservation is kept.
        let outcome = g.attempt_capture("ghost", &f, &b).await;
        assert!(matches!(outcome, CaptureOutcome::Unlinked { .. }));
        assert_eq!(blobs.upload_count(), 1);
        assert_eq!(g.attempt_capture("ghost", &f, &b).await, CaptureOutcome::AlreadyCaptured);
        assert_eq!(blobs.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_frame_fails_without_upload() {
        let store = Arc::new(MemoryStore::new().with_identity(identity("new", "New Contact", None)));
        let blobs = Arc::new(MemoryBlobStore::new());
        let g = guard(store, blobs.clone());

        let bad = FrameImage {
            data: vec![0; 10],
            width: 320,
            height: 240,
        };
        assert!(matches!(
            g.attempt_capture("new", &bad, &bbox(0.0, 0.0, 10.0, 10.0)).await,
            CaptureOutcome::Failed { .. }
        ));
        assert_eq!(blobs.upload_count(), 0);
    }
}
