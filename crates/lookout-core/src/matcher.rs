//! Nearest-neighbor matching against the identity store.
//!
//! The matcher deliberately degrades to "no match" on store failures or
//! timeouts so the resolver falls through to identity creation: a duplicate
//! identity is recoverable (mergeable later), a lost sighting is not.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{Identity, IdentityStore};
use crate::types::Embedding;

/// Default acceptance threshold for a positive match.
///
/// The similarity scale is [0, 1] with 1.0 denoting an exact match.
/// Configurable via `LOOKOUT_MATCH_THRESHOLD` in the daemon.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

/// Default bound on a single nearest-neighbor store round-trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// A positive match: the nearest stored identity and its similarity.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    pub identity: Identity,
    pub similarity: f32,
}

/// Applies the acceptance threshold to the store's nearest-neighbor answer.
pub struct SimilarityMatcher {
    store: Arc<dyn IdentityStore>,
    threshold: f32,
    timeout: Duration,
}

impl SimilarityMatcher {
    pub fn new(store: Arc<dyn IdentityStore>, threshold: f32, timeout: Duration) -> Self {
        Self {
            store,
            threshold,
            timeout,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Match a probe embedding against stored identities.
    ///
    /// Returns `None` when the best candidate falls below the threshold,
    /// when no identity carries an embedding, or when the store is
    /// unreachable or times out (degrade-to-create).
    pub async fn match_embedding(&self, probe: &Embedding) -> Option<FaceMatch> {
        let nearest = match tokio::time::timeout(self.timeout, self.store.nearest_identity(probe))
            .await
        {
            Ok(Ok(nearest)) => nearest,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "nearest-identity query failed; treating as no match");
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "nearest-identity query timed out; treating as no match"
                );
                return None;
            }
        };

        let (identity, similarity) = nearest?;
        if similarity >= self.threshold {
            tracing::debug!(
                identity_id = %identity.id,
                similarity,
                threshold = self.threshold,
                "match accepted"
            );
            Some(FaceMatch {
                identity,
                similarity,
            })
        } else {
            tracing::debug!(
                similarity,
                threshold = self.threshold,
                "best candidate below threshold"
            );
            None
        }
    }
}
