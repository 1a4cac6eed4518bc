//! Filesystem blob store for headshot crops.
//!
//! Objects land under a root directory and are addressed by a public base
//! URL (a static file server or reverse proxy in front of the directory).

use std::path::PathBuf;

use async_trait::async_trait;

use lookout_core::store::{BlobStore, StoreError};

pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put_object(
        &self,
        name: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        // Object names come from identity IDs and timestamps; anything with
        // a path separator is not one of ours.
        if name.contains('/') || name.contains("..") {
            return Err(StoreError::Corrupt(format!("invalid object name {name:?}")));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("blob root: {e}")))?;

        let path = self.root.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("blob write {name}: {e}")))?;

        tracing::debug!(path = %path.display(), "stored blob");
        Ok(format!("{}/{name}", self.public_base.trim_end_matches('/')))
    }
}
