//! SQLite-backed identity, session and event store.
//!
//! Embeddings are stored as little-endian f32 BLOBs and the nearest-neighbor
//! query scans them in-process with cosine similarity. A partial unique
//! index on the active session row makes `create_session` an atomic upsert:
//! two racing creators both land on the single surviving active session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;

use lookout_core::store::{
    Event, EventFilter, EventKind, EventStore, Identity, IdentityPatch, IdentityStore, NewIdentity,
    Session, SessionStore, StoreError,
};
use lookout_core::types::Embedding;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    relationship_status TEXT,
    face_embedding      BLOB,
    headshot_media_url  TEXT,
    metadata            TEXT NOT NULL DEFAULT '{}',
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id         TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at   TEXT,
    title      TEXT
);

-- At most one active session. The constant expression makes every active
-- row collide in the index, so a second INSERT is ignored.
CREATE UNIQUE INDEX IF NOT EXISTS sessions_single_active
    ON sessions ((1)) WHERE ended_at IS NULL;

CREATE TABLE IF NOT EXISTS events (
    id                  TEXT PRIMARY KEY,
    session_id          TEXT REFERENCES sessions(id),
    kind                TEXT NOT NULL,
    content             TEXT NOT NULL,
    related_identity_id TEXT REFERENCES identities(id),
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS events_session  ON events(session_id);
CREATE INDEX IF NOT EXISTS events_identity ON events(related_identity_id);
";

/// SQLite store shared by the resolver, session manager and event log.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await.map_err(unavailable)?;
        let store = Self { conn };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(unavailable)?;
        let store = Self { conn };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(unavailable)
    }
}

fn unavailable(err: tokio_rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    embedding
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn embedding_from_blob(blob: &[u8]) -> Result<Embedding, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob length {} not a multiple of 4",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding { values })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

/// Raw identity row, decoded outside the connection closure.
struct IdentityRow {
    id: String,
    name: String,
    relationship_status: Option<String>,
    face_embedding: Option<Vec<u8>>,
    headshot_media_url: Option<String>,
    metadata: String,
    created_at: String,
}

impl IdentityRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            relationship_status: row.get(2)?,
            face_embedding: row.get(3)?,
            headshot_media_url: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<Identity, StoreError> {
        let face_embedding = self
            .face_embedding
            .as_deref()
            .map(embedding_from_blob)
            .transpose()?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| StoreError::Corrupt(format!("identity metadata: {e}")))?;
        Ok(Identity {
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            name: self.name,
            relationship_status: self.relationship_status,
            face_embedding,
            headshot_media_url: self.headshot_media_url,
            metadata,
        })
    }
}

const IDENTITY_COLS: &str =
    "id, name, relationship_status, face_embedding, headshot_media_url, metadata, created_at";

struct SessionRow {
    id: String,
    started_at: String,
    ended_at: Option<String>,
    title: Option<String>,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            started_at: row.get(1)?,
            ended_at: row.get(2)?,
            title: row.get(3)?,
        })
    }

    fn decode(self) -> Result<Session, StoreError> {
        Ok(Session {
            started_at: parse_ts(&self.started_at)?,
            ended_at: self.ended_at.as_deref().map(parse_ts).transpose()?,
            id: self.id,
            title: self.title,
        })
    }
}

struct EventRow {
    id: String,
    session_id: Option<String>,
    kind: String,
    content: String,
    related_identity_id: Option<String>,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            kind: row.get(2)?,
            content: row.get(3)?,
            related_identity_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Event, StoreError> {
        let kind = EventKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("event kind {:?}", self.kind)))?;
        Ok(Event {
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            session_id: self.session_id,
            kind,
            content: self.content,
            related_identity_id: self.related_identity_id,
        })
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn create_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let blob = new.face_embedding.as_ref().map(embedding_to_blob);
        let metadata = new.metadata.to_string();

        let identity = Identity {
            id: id.clone(),
            name: new.name,
            relationship_status: new.relationship_status,
            face_embedding: new.face_embedding,
            headshot_media_url: new.headshot_media_url,
            metadata: new.metadata,
            created_at,
        };

        let row = (
            id,
            identity.name.clone(),
            identity.relationship_status.clone(),
            blob,
            identity.headshot_media_url.clone(),
            metadata,
            created_at.to_rfc3339(),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (id, name, relationship_status, face_embedding,
                                             headshot_media_url, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![row.0, row.1, row.2, row.3, row.4, row.5, row.6],
                )?;
                Ok(())
            })
            .await
            .map_err(unavailable)?;
        Ok(identity)
    }

    async fn get_identity(&self, id: &str) -> Result<Identity, StoreError> {
        let key = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {IDENTITY_COLS} FROM identities WHERE id = ?1"),
                        [&key],
                        IdentityRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(unavailable)?;
        row.ok_or_else(|| StoreError::NotFound(format!("identity {id}")))?
            .decode()
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {IDENTITY_COLS} FROM identities ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map([], IdentityRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(unavailable)?;
        rows.into_iter().map(IdentityRow::decode).collect()
    }

    async fn update_identity(&self, id: &str, patch: IdentityPatch) -> Result<Identity, StoreError> {
        let key = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE identities SET
                         name                = COALESCE(?2, name),
                         relationship_status = COALESCE(?3, relationship_status),
                         headshot_media_url  = COALESCE(?4, headshot_media_url)
                     WHERE id = ?1",
                    rusqlite::params![key, patch.name, patch.relationship_status, patch.headshot_media_url],
                )?;
                Ok(n)
            })
            .await
            .map_err(unavailable)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("identity {id}")));
        }
        self.get_identity(id).await
    }

    async fn nearest_identity(
        &self,
        probe: &Embedding,
    ) -> Result<Option<(Identity, f32)>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {IDENTITY_COLS} FROM identities WHERE face_embedding IS NOT NULL"
                ))?;
                let rows = stmt
                    .query_map([], IdentityRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(unavailable)?;

        let mut best: Option<(Identity, f32)> = None;
        for row in rows {
            let identity = row.decode()?;
            let Some(stored) = identity.face_embedding.as_ref() else {
                continue;
            };
            // Similarity reported on the [0, 1] scale.
            let similarity = probe.similarity(stored).max(0.0);
            if best.as_ref().map_or(true, |(_, s)| similarity > *s) {
                best = Some((identity, similarity));
            }
        }
        Ok(best)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn active_session(&self) -> Result<Option<Session>, StoreError> {
        let row = self
            .conn
            .call(|conn| {
                let row = conn
                    .query_row(
                        "SELECT id, started_at, ended_at, title FROM sessions
                         WHERE ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
                        [],
                        SessionRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(unavailable)?;
        row.map(SessionRow::decode).transpose()
    }

    async fn create_session(&self, title: Option<String>) -> Result<Session, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now().to_rfc3339();
        let row = self
            .conn
            .call(move |conn| {
                // INSERT OR IGNORE + re-read: the partial unique index turns
                // a lost race into a read of the winner's row.
                conn.execute(
                    "INSERT OR IGNORE INTO sessions (id, started_at, ended_at, title)
                     VALUES (?1, ?2, NULL, ?3)",
                    rusqlite::params![id, started_at, title],
                )?;
                let row = conn.query_row(
                    "SELECT id, started_at, ended_at, title FROM sessions
                     WHERE ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
                    [],
                    SessionRow::from_row,
                )?;
                Ok(row)
            })
            .await
            .map_err(unavailable)?;
        row.decode()
    }

    async fn end_session(&self, id: &str) -> Result<Session, StoreError> {
        let key = id.to_string();
        let ended_at = Utc::now().to_rfc3339();
        let row = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sessions SET ended_at = ?2 WHERE id = ?1",
                    rusqlite::params![key, ended_at],
                )?;
                let row = conn
                    .query_row(
                        "SELECT id, started_at, ended_at, title FROM sessions WHERE id = ?1",
                        [&key],
                        SessionRow::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(unavailable)?;
        row.ok_or_else(|| StoreError::NotFound(format!("session {id}")))?
            .decode()
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn append_event(
        &self,
        session_id: Option<String>,
        kind: EventKind,
        content: String,
        related_identity_id: Option<String>,
    ) -> Result<Event, StoreError> {
        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            kind,
            content,
            related_identity_id,
            created_at: Utc::now(),
        };
        let row = (
            event.id.clone(),
            event.session_id.clone(),
            kind.as_str(),
            event.content.clone(),
            event.related_identity_id.clone(),
            event.created_at.to_rfc3339(),
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO events (id, session_id, kind, content, related_identity_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![row.0, row.1, row.2, row.3, row.4, row.5],
                )?;
                Ok(())
            })
            .await
            .map_err(unavailable)?;
        Ok(event)
    }

    async fn events(&self, filter: EventFilter) -> Result<Vec<Event>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT id, session_id, kind, content, related_identity_id, created_at
                     FROM events",
                );
                let mut clauses = Vec::new();
                let mut params: Vec<String> = Vec::new();
                if let Some(sid) = &filter.session_id {
                    params.push(sid.clone());
                    clauses.push(format!("session_id = ?{}", params.len()));
                }
                if let Some(iid) = &filter.identity_id {
                    params.push(iid.clone());
                    clauses.push(format!("related_identity_id = ?{}", params.len()));
                }
                if !clauses.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&clauses.join(" AND "));
                }
                sql.push_str(" ORDER BY created_at DESC");
                if let Some(limit) = filter.limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params), EventRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(unavailable)?;
        rows.into_iter().map(EventRow::decode).collect()
    }
}
