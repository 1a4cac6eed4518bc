//! CSV bulk import of identities.
//!
//! Delimited text with a header row; required column `name`, optional
//! `linkedin_url` and `headshot_media_url`. Rows without a name are dropped
//! during parsing; rows without a headshot URL are counted as skipped (no
//! embedding can be generated without an image). Quoted fields support
//! embedded commas and doubled quote characters. A bad row never aborts the
//! batch; per-row errors accumulate into the result summary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::store::{IdentityStore, NewIdentity};
use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("CSV must contain a 'name' column")]
    MissingNameColumn,
}

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
}

/// Embedding generation collaborator: produces a face embedding from an
/// image URL, or `None` when no face is found in the image.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embedding_from_url(&self, url: &str) -> Result<Option<Embedding>, EmbedError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    pub name: String,
    pub linkedin_url: Option<String>,
    pub headshot_media_url: Option<String>,
}

/// Import batch summary.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CsvImportResult {
    pub success: bool,
    pub processed: usize,
    pub created: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Parse CSV content into rows. Rows lacking a name are dropped here.
pub fn parse_csv(content: &str) -> Result<Vec<CsvRow>, ImportError> {
    let mut lines = content.trim().lines();
    let Some(header_line) = lines.next() else {
        return Ok(Vec::new());
    };

    let headers: Vec<String> = parse_line(header_line)
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let name_idx = headers
        .iter()
        .position(|h| h == "name")
        .ok_or(ImportError::MissingNameColumn)?;
    let linkedin_idx = headers.iter().position(|h| h == "linkedin_url");
    let headshot_idx = headers.iter().position(|h| h == "headshot_media_url");

    let mut rows = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let values = parse_line(line);

        let field = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| values.get(i))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let Some(name) = field(Some(name_idx)) else {
            continue;
        };
        rows.push(CsvRow {
            name,
            linkedin_url: field(linkedin_idx),
            headshot_media_url: field(headshot_idx),
        });
    }
    Ok(rows)
}

/// Split one CSV line, honoring quoted fields and doubled quotes.
fn parse_line(line: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                values.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    values.push(current);
    values
}

/// Creates identities from CSV rows, generating embeddings from headshot
/// URLs via the embedding collaborator.
pub struct CsvImporter {
    identities: Arc<dyn IdentityStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl CsvImporter {
    pub fn new(identities: Arc<dyn IdentityStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            identities,
            embedder,
        }
    }

    pub async fn import(&self, content: &str) -> CsvImportResult {
        let mut result = CsvImportResult {
            success: true,
            ..Default::default()
        };

        let rows = match parse_csv(content) {
            Ok(rows) => rows,
            Err(err) => {
                result.success = false;
                result.errors.push(format!("CSV parsing error: {err}"));
                return result;
            }
        };
        result.processed = rows.len();

        for row in rows {
            let Some(headshot_url) = row.headshot_media_url.as_deref() else {
                result.skipped += 1;
                continue;
            };

            let embedding = match self.embedder.embedding_from_url(headshot_url).await {
                Ok(Some(embedding)) => embedding,
                Ok(None) => {
                    result.skipped += 1;
                    result.errors.push(format!(
                        "Skipped {}: could not generate embedding from headshot URL",
                        row.name
                    ));
                    continue;
                }
                Err(err) => {
                    result.success = false;
                    result
                        .errors
                        .push(format!("Error processing {}: {err}", row.name));
                    continue;
                }
            };

            let mut metadata = serde_json::json!({
                "imported_from_csv": true,
                "imported_at": Utc::now().to_rfc3339(),
            });
            if let Some(linkedin) = &row.linkedin_url {
                metadata["linkedin_url"] = serde_json::Value::String(linkedin.clone());
            }

            let new = NewIdentity {
                name: row.name.clone(),
                relationship_status: None,
                face_embedding: Some(embedding),
                headshot_media_url: Some(headshot_url.to_string()),
                metadata,
            };
            match self.identities.create_identity(new).await {
                Ok(identity) => {
                    tracing::info!(identity_id = %identity.id, name = %identity.name, "imported identity");
                    result.created += 1;
                }
                Err(err) => {
                    result.success = false;
                    result
                        .errors
                        .push(format!("Error processing {}: {err}", row.name));
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryStore;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embedding_from_url(&self, url: &str) -> Result<Option<Embedding>, EmbedError> {
            if url.contains("noface") {
                Ok(None)
            } else {
                Ok(Some(Embedding::canonical(&[0.1, 0.2, 0.3])))
            }
        }
    }

    #[test]
    fn test_parse_line_handles_quotes_and_embedded_commas() {
        assert_eq!(
            parse_line(r#""Doe, Jane",x,"say ""hi""""#),
            vec!["Doe, Jane", "x", r#"say "hi""#]
        );
    }

    #[test]
    fn test_parse_csv_drops_rows_without_name() {
        let rows = parse_csv("name,headshot_media_url\n,http://x/a.jpg\nAda,http://x/b.jpg\n").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Ada");
    }

    #[test]
    fn test_parse_csv_requires_name_column() {
        assert!(matches!(
            parse_csv("headshot_media_url\nhttp://x/a.jpg\n"),
            Err(ImportError::MissingNameColumn)
        ));
    }

    #[test]
    fn test_parse_csv_header_is_case_insensitive() {
        let rows = parse_csv("Name,LinkedIn_URL\nAda,http://li/ada\n").unwrap();
        assert_eq!(rows[0].linkedin_url.as_deref(), Some("http://li/ada"));
    }

    #[tokio::test]
    async fn test_import_counts_created_and_skipped() {
        let store = Arc::new(MemoryStore::new());
        let importer = CsvImporter::new(store.clone(), Arc::new(FixedEmbedder));
        let result = importer
            .import("name,linkedin_url,headshot_media_url\nAda,,http://x/a.jpg\nBob,http://li/b,\n")
            .await;

        assert!(result.success);
        assert_eq!(result.processed, 2);
        assert_eq!(result.created, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(store.identity_count(), 1);

        let created = &store.identities.lock().unwrap()[0];
        assert_eq!(created.name, "Ada");
        assert_eq!(created.metadata["imported_from_csv"], true);
        assert_eq!(created.headshot_media_url.as_deref(), Some("http://x/a.jpg"));
    }

    #[tokio::test]
    async fn test_embedding_miss_is_skipped_with_error_line() {
        let store = Arc::new(MemoryStore::new());
        let importer = CsvImporter::new(store.clone(), Arc::new(FixedEmbedder));
        let result = importer
            .import("name,headshot_media_url\nEve,http://x/noface.jpg\n")
            .await;

        assert!(result.success);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.created, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Eve"));
    }

    #[tokio::test]
    async fn test_store_failure_marks_batch_unsuccessful_but_continues() {
        let store = Arc::new(MemoryStore::new());
        store
            .fail_identities
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let importer = CsvImporter::new(store, Arc::new(FixedEmbedder));
        let result = importer
            .import("name,headshot_media_url\nAda,http://x/a.jpg\nBob,http://x/b.jpg\n")
            .await;

        assert!(!result.success);
        assert_eq!(result.processed, 2);
        assert_eq!(result.created, 0);
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_linkedin_url_lands_in_metadata() {
        let store = Arc::new(MemoryStore::new());
        let importer = CsvImporter::new(store.clone(), Arc::new(FixedEmbedder));
        importer
            .import("name,linkedin_url,headshot_media_url\nAda,http://li/ada,http://x/a.jpg\n")
            .await;
        let created = &store.identities.lock().unwrap()[0];
        assert_eq!(created.metadata["linkedin_url"], "http://li/ada");
    }
}
