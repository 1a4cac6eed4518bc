//! D-Bus client for the external embedding-generation collaborator.
//!
//! CSV import needs embeddings for headshot URLs; the model process that
//! produces them lives outside this daemon and is reached over the bus.

use async_trait::async_trait;

use lookout_core::import::{EmbedError, EmbeddingProvider};
use lookout_core::types::Embedding;

#[zbus::proxy(
    interface = "io.lookout.Embedder1",
    default_service = "io.lookout.Embedder1",
    default_path = "/io/lookout/Embedder1"
)]
trait Embedder {
    /// Embedding for the face in the image at `url`; empty when no face
    /// was found.
    async fn embedding_from_url(&self, url: &str) -> zbus::Result<Vec<f64>>;
}

pub struct DbusEmbeddingProvider {
    proxy: EmbedderProxy<'static>,
}

impl DbusEmbeddingProvider {
    pub async fn connect(connection: &zbus::Connection) -> zbus::Result<Self> {
        Ok(Self {
            proxy: EmbedderProxy::new(connection).await?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for DbusEmbeddingProvider {
    async fn embedding_from_url(&self, url: &str) -> Result<Option<Embedding>, EmbedError> {
        let values = self
            .proxy
            .embedding_from_url(url)
            .await
            .map_err(|e| EmbedError::Unavailable(e.to_string()))?;
        if values.is_empty() {
            return Ok(None);
        }
        let values: Vec<f32> = values.into_iter().map(|v| v as f32).collect();
        Ok(Some(Embedding::canonical(&values)))
    }
}
