use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical embedding length. Vectors from the detection collaborator are
/// zero-padded or truncated to this length before storage or comparison.
pub const EMBEDDING_DIM: usize = 1024;

/// Bounding box for a detected face, in source-frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Face embedding vector, canonical length [`EMBEDDING_DIM`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Build a canonical-length embedding: shorter inputs are zero-padded,
    /// longer inputs truncated.
    pub fn canonical(raw: &[f32]) -> Self {
        let mut values = raw.to_vec();
        values.resize(EMBEDDING_DIM, 0.0);
        Self { values }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One face reported by the detection collaborator for a frame.
///
/// The embedding may be absent when detection confidence was too low to
/// produce one; such faces are skipped by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub embedding: Option<Vec<f32>>,
}

/// A raw RGB8 frame image, carried alongside detections so the capture
/// guard can crop a headshot without re-contacting the camera.
#[derive(Debug, Clone)]
pub struct FrameImage {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One detection snapshot: the frame (optional) plus all faces found in it.
#[derive(Debug, Clone)]
pub struct DetectionFrame {
    pub image: Option<FrameImage>,
    pub faces: Vec<DetectedFace>,
}

impl DetectionFrame {
    /// Primary-subject selection: the largest face that carries an embedding.
    pub fn primary_face(&self) -> Option<&DetectedFace> {
        self.faces
            .iter()
            .filter(|f| f.embedding.as_ref().is_some_and(|e| !e.is_empty()))
            .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
    }
}

/// The single current "who is being observed" state held by the context bus.
///
/// In-memory only; replaced wholesale on every update, never merged
/// field-by-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSnapshot {
    /// True when the sighting matched an existing identity.
    pub found: bool,
    pub id: Option<String>,
    pub name: Option<String>,
    pub relationship_status: Option<String>,
    pub similarity: Option<f32>,
    pub last_seen: DateTime<Utc>,
}

impl VisualSnapshot {
    /// Snapshot for "nobody visible".
    pub fn nobody() -> Self {
        Self {
            found: false,
            id: None,
            name: None,
            relationship_status: None,
            similarity: None,
            last_seen: Utc::now(),
        }
    }
}
