//! In-memory store fakes for component tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::store::{
    BlobStore, Event, EventFilter, EventKind, EventStore, Identity, IdentityPatch, IdentityStore,
    NewIdentity, Session, SessionStore, StoreError,
};
use crate::types::Embedding;

/// In-memory identity/session/event store with switchable failure modes.
#[derive(Default)]
pub struct MemoryStore {
    pub identities: Mutex<Vec<Identity>>,
    pub sessions: Mutex<Vec<Session>>,
    pub events: Mutex<Vec<Event>>,
    /// When set, identity operations fail with `StoreError::Unavailable`.
    pub fail_identities: AtomicBool,
    /// When set, event appends fail with `StoreError::Unavailable`.
    pub fail_events: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(self, identity: Identity) -> Self {
        self.identities.lock().unwrap().push(identity);
        self
    }

    pub fn identity_count(&self) -> usize {
        self.identities.lock().unwrap().len()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn check_identities(&self) -> Result<(), StoreError> {
        if self.fail_identities.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

pub fn identity(id: &str, name: &str, embedding: Option<Embedding>) -> Identity {
    Identity {
        id: id.to_string(),
        name: name.to_string(),
        relationship_status: Some("Friend".into()),
        face_embedding: embedding,
        headshot_media_url: None,
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        self.check_identities()?;
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            relationship_status: new.relationship_status,
            face_embedding: new.face_embedding,
            headshot_media_url: new.headshot_media_url,
            metadata: new.metadata,
            created_at: Utc::now(),
        };
        self.identities.lock().unwrap().push(identity.clone());
        Ok(identity)
    }

    async fn get_identity(&self, id: &str) -> Result<Identity, StoreError> {
        self.check_identities()?;
        self.identities
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        self.check_identities()?;
        let mut all = self.identities.lock().unwrap().clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn update_identity(&self, id: &str, patch: IdentityPatch) -> Result<Identity, StoreError> {
        self.check_identities()?;
        let mut identities = self.identities.lock().unwrap();
        let identity = identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("identity {id}")))?;
        if let Some(name) = patch.name {
            identity.name = name;
        }
        if let Some(status) = patch.relationship_status {
            identity.relationship_status = Some(status);
        }
        if let Some(url) = patch.headshot_media_url {
            identity.headshot_media_url = Some(url);
        }
        Ok(identity.clone())
    }

    async fn nearest_identity(
        &self,
        probe: &Embedding,
    ) -> Result<Option<(Identity, f32)>, StoreError> {
        self.check_identities()?;
        let identities = self.identities.lock().unwrap();
        let best = identities
            .iter()
            .filter_map(|i| {
                i.face_embedding
                    .as_ref()
                    .map(|e| (i.clone(), probe.similarity(e).max(0.0)))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));
        Ok(best)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn active_session(&self) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.lock().unwrap();
        let mut active: Vec<&Session> = sessions.iter().filter(|s| s.ended_at.is_none()).collect();
        active.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(active.first().map(|s| (*s).clone()))
    }

    async fn create_session(&self, title: Option<String>) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        // Atomic-upsert semantics: an existing active session wins.
        if let Some(existing) = sessions.iter().find(|s| s.ended_at.is_none()) {
            return Ok(existing.clone());
        }
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            title,
        };
        sessions.push(session.clone());
        Ok(session)
    }

    async fn end_session(&self, id: &str) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        session.ended_at = Some(Utc::now());
        Ok(session.clone())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append_event(
        &self,
        session_id: Option<String>,
        kind: EventKind,
        content: String,
        related_identity_id: Option<String>,
    ) -> Result<Event, StoreError> {
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            kind,
            content,
            related_identity_id,
            created_at: Utc::now(),
        };
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        let mut all = self.events.lock().unwrap().clone();
        if let Some(sid) = &filter.session_id {
            all.retain(|e| e.session_id.as_deref() == Some(sid));
        }
        if let Some(iid) = &filter.identity_id {
            all.retain(|e| e.related_identity_id.as_deref() == Some(iid));
        }
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            all.truncate(limit as usize);
        }
        Ok(all)
    }
}

/// In-memory blob store counting uploads, with a one-shot failure switch.
#[derive(Default)]
pub struct MemoryBlobStore {
    pub uploads: Mutex<Vec<String>>,
    pub fail_next: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_object(
        &self,
        name: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blob store offline".into()));
        }
        self.uploads.lock().unwrap().push(name.to_string());
        Ok(format!("memory://headshots/{name}"))
    }
}
