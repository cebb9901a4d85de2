//! Session storage adapters.
//!
//! Two [`SessionStore`] implementations:
//! - [`InMemorySessionStore`] keeps everything in process memory. Used by
//!   tests and short-lived tools.
//! - [`SqliteSessionStore`] serialises sessions and snapshots to JSON and
//!   keeps them in a SQLite file:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS sessions (
//!     session_id TEXT PRIMARY KEY,
//!     data       BLOB NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! CREATE TABLE IF NOT EXISTS snapshots (
//!     session_id  TEXT NOT NULL,
//!     snapshot_id TEXT NOT NULL,
//!     name        TEXT NOT NULL,
//!     description TEXT,
//!     created_at  INTEGER NOT NULL,
//!     data        BLOB NOT NULL,
//!     PRIMARY KEY (session_id, snapshot_id)
//! );
//! ```
//!
//! SQLite calls block, so every call runs on tokio's blocking pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::config::{PersistenceConfig, StorageBackend};
use crate::error::{FabulaError, Result};
use crate::ports::SessionStore;
use crate::snapshot::{Snapshot, SnapshotMeta};
use crate::types::Timestamp;
use crate::world::SessionState;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        data       BLOB NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS snapshots (
        session_id  TEXT NOT NULL,
        snapshot_id TEXT NOT NULL,
        name        TEXT NOT NULL,
        description TEXT,
        created_at  INTEGER NOT NULL,
        data        BLOB NOT NULL,
        PRIMARY KEY (session_id, snapshot_id)
    );";

/// Open the store selected by `config.backend`.
///
/// # Errors
/// Returns [`FabulaError::Database`] if the SQLite file cannot be opened.
pub fn open_store(config: &PersistenceConfig) -> Result<Arc<dyn SessionStore>> {
    Ok(match config.backend {
        StorageBackend::Memory => Arc::new(InMemorySessionStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteSessionStore::open(&config.path, config)?),
    })
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
    snapshots: Mutex<HashMap<String, Vec<Snapshot>>>,
}

impl InMemorySessionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_session(&self, session: &SessionState) -> Result<()> {
        self.sessions.lock().insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        Ok(self.sessions.lock().get(session_id).cloned())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        self.snapshots.lock().remove(session_id);
        Ok(self.sessions.lock().remove(session_id).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.lock().contains_key(session_id))
    }

    async fn save_snapshot(&self, session_id: &str, snapshot: &Snapshot) -> Result<()> {
        let mut all = self.snapshots.lock();
        let list = all.entry(session_id.to_string()).or_default();
        match list.iter_mut().find(|s| s.id == snapshot.id) {
            Some(existing) => *existing = snapshot.clone(),
            None => list.push(snapshot.clone()),
        }
        Ok(())
    }

    async fn load_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>> {
        Ok(self
            .snapshots
            .lock()
            .get(session_id)
            .and_then(|list| list.iter().find(|s| s.id == snapshot_id).cloned()))
    }

    async fn list_snapshots(&self, session_id: &str) -> Result<Vec<SnapshotMeta>> {
        Ok(self
            .snapshots
            .lock()
            .get(session_id)
            .map(|list| list.iter().map(Snapshot::meta).collect())
            .unwrap_or_default())
    }

    async fn delete_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<bool> {
        let mut all = self.snapshots.lock();
        let Some(list) = all.get_mut(session_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|s| s.id != snapshot_id);
        Ok(list.len() != before)
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// SQLite-backed store.
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSessionStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteSessionStore {
    /// Open (or create) a database at `path`. WAL is enabled when
    /// `config.wal_mode` is set.
    ///
    /// # Errors
    /// Returns [`FabulaError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %db_path.display(), wal = config.wal_mode, "Session store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    /// Returns [`FabulaError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| FabulaError::Storage(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save_session(&self, session: &SessionState) -> Result<()> {
        let start = Instant::now();
        let json = serde_json::to_vec(session)?;
        let bytes = json.len();
        let id = session.id.clone();
        let log_id = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, data, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at",
                params![id, json, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await?;
        debug!(session = %log_id, bytes, elapsed_us = start.elapsed().as_micros(), "Saved session");
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        let id = session_id.to_string();
        let data: Option<Vec<u8>> = self
            .with_conn(move |conn| {
                Ok(conn
                    .prepare_cached("SELECT data FROM sessions WHERE session_id = ?1")?
                    .query_row(params![id], |row| row.get(0))
                    .optional()?)
            })
            .await?;
        data.map(|d| serde_json::from_slice(&d).map_err(FabulaError::from)).transpose()
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM snapshots WHERE session_id = ?1", params![id])?;
            let deleted = conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT session_id FROM sessions ORDER BY session_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE session_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn save_snapshot(&self, session_id: &str, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec(snapshot)?;
        let session = session_id.to_string();
        let meta = snapshot.meta();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO snapshots (session_id, snapshot_id, name, description, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(session_id, snapshot_id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    created_at = excluded.created_at,
                    data = excluded.data",
                params![session, meta.id, meta.name, meta.description, meta.created_at.millis(), json],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>> {
        let session = session_id.to_string();
        let snap = snapshot_id.to_string();
        let data: Option<Vec<u8>> = self
            .with_conn(move |conn| {
                Ok(conn
                    .prepare_cached("SELECT data FROM snapshots WHERE session_id = ?1 AND snapshot_id = ?2")?
                    .query_row(params![session, snap], |row| row.get(0))
                    .optional()?)
            })
            .await?;
        data.map(|d| serde_json::from_slice(&d).map_err(FabulaError::from)).transpose()
    }

    async fn list_snapshots(&self, session_id: &str) -> Result<Vec<SnapshotMeta>> {
        let session = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT snapshot_id, name, description, created_at FROM snapshots
                 WHERE session_id = ?1 ORDER BY created_at, rowid",
            )?;
            let metas = stmt
                .query_map(params![session], |row| {
                    Ok(SnapshotMeta {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        created_at: Timestamp::from_millis(row.get(3)?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(metas)
        })
        .await
    }

    async fn delete_snapshot(&self, session_id: &str, snapshot_id: &str) -> Result<bool> {
        let session = session_id.to_string();
        let snap = snapshot_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM snapshots WHERE session_id = ?1 AND snapshot_id = ?2",
                params![session, snap],
            )?;
            Ok(deleted > 0)
        })
        .await
    }
}
