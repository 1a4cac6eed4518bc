//! Active-session management.

use std::sync::Arc;

use crate::store::{Session, SessionStore, StoreError};

/// Guarantees a single active recording session, creating one lazily.
///
/// The store's `create_session` is an atomic upsert (a partial unique index
/// on the active row in the SQLite backend), so two near-simultaneous
/// callers both land on the same session instead of racing a
/// check-then-act sequence into two active rows.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Return the newest active session, creating one if none exists.
    pub async fn get_or_create_active(&self) -> Result<Session, StoreError> {
        if let Some(session) = self.store.active_session().await? {
            return Ok(session);
        }
        let session = self.store.create_session(None).await?;
        tracing::info!(session_id = %session.id, "started new recording session");
        Ok(session)
    }

    /// Close the active session, if there is one.
    pub async fn end_active(&self) -> Result<Option<Session>, StoreError> {
        match self.store.active_session().await? {
            Some(session) => {
                let ended = self.store.end_session(&session.id).await?;
                tracing::info!(session_id = %ended.id, "ended recording session");
                Ok(Some(ended))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryStore;

    #[tokio::test]
    async fn test_creates_session_when_none_active() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone());
        let session = manager.get_or_create_active().await.unwrap();
        assert!(session.ended_at.is_none());
        assert_eq!(store.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reuses_existing_active_session() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone());
        let first = manager.get_or_create_active().await.unwrap();
        let second = manager.get_or_create_active().await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_end_active_then_create_starts_fresh() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone());
        let first = manager.get_or_create_active().await.unwrap();
        let ended = manager.end_active().await.unwrap().unwrap();
        assert_eq!(first.id, ended.id);
        assert!(ended.ended_at.is_some());
        let next = manager.get_or_create_active().await.unwrap();
        assert_ne!(first.id, next.id);
    }

    #[tokio::test]
    async fn test_end_active_without_session_is_noop() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()));
        assert!(manager.end_active().await.unwrap().is_none());
    }
}
