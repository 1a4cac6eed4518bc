//! lookout-store — Concrete persistence backends for the pipeline.
//!
//! `SqliteStore` implements the identity/session/event traits from
//! `lookout-core`; `FsBlobStore` implements binary storage for headshots.

pub mod blob;
pub mod sqlite;

pub use blob::FsBlobStore;
pub use sqlite::SqliteStore;
