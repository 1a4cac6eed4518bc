//! lookout-core — Identity resolution and visual-context distribution.
//!
//! Resolves face-embedding observations into persistent identities,
//! keeps an append-only audit trail of sightings, guards one-shot headshot
//! capture, and broadcasts the currently-observed identity to a debounced
//! agent notifier. Persistence is reached only through the traits in
//! [`store`]; concrete backends live in `lookout-store`.

pub mod bus;
pub mod capture;
pub mod event;
pub mod import;
pub mod matcher;
pub mod notify;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use bus::{Subscription, VisualContextBus};
pub use capture::{CaptureGuard, CaptureOutcome};
pub use event::EventLog;
pub use import::{CsvImporter, EmbeddingProvider};
pub use matcher::{FaceMatch, SimilarityMatcher, DEFAULT_MATCH_THRESHOLD};
pub use notify::{NotificationDebouncer, DEFAULT_NOTIFY_INTERVAL};
pub use resolver::{IdentityResolver, Resolution};
pub use session::SessionManager;
pub use store::{Event, EventKind, Identity, Session, StoreError};
pub use types::{BoundingBox, DetectedFace, DetectionFrame, Embedding, FrameImage, VisualSnapshot, EMBEDDING_DIM};
