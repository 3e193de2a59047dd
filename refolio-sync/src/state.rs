//! Durable per-library sync state.
//!
//! A small SQLite table records, for every library ever synced, when the
//! last successful cycle finished and whether one is in flight right now.
//! The blocking [`rusqlite`] connection is wrapped in an async facade so
//! engine code never holds it across awaits.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use refolio_model::LibraryId;

use crate::errors::Result;

/// Sync bookkeeping for one library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryState {
    pub library: LibraryId,
    pub last_sync: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub progress: f32,
}

impl LibraryState {
    pub fn new(library: LibraryId) -> Self {
        Self {
            library,
            last_sync: None,
            in_progress: false,
            progress: 0.0,
        }
    }
}

struct StateDatabase {
    conn: Connection,
}

// The connection is only ever touched behind the async RwLock.
unsafe impl Send for StateDatabase {}
unsafe impl Sync for StateDatabase {}

impl StateDatabase {
    fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS library_sync_state (
                library_id TEXT PRIMARY KEY,
                last_sync TEXT,
                in_progress INTEGER NOT NULL DEFAULT 0,
                progress REAL NOT NULL DEFAULT 0.0,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        debug!("Sync state database initialized");
        Ok(())
    }

    fn upsert(&mut self, state: &LibraryState) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO library_sync_state (library_id, last_sync, in_progress, progress, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(library_id) DO UPDATE SET
                last_sync = excluded.last_sync,
                in_progress = excluded.in_progress,
                progress = excluded.progress,
                updated_at = excluded.updated_at
            "#,
            params![
                state.library.as_str(),
                state.last_sync.map(|t| t.to_rfc3339()),
                state.in_progress as i32,
                state.progress as f64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get(&self, library: &LibraryId) -> Result<Option<LibraryState>> {
        let state = self
            .conn
            .query_row(
                "SELECT library_id, last_sync, in_progress, progress
                 FROM library_sync_state WHERE library_id = ?1",
                params![library.as_str()],
                row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    fn all(&self) -> Result<Vec<LibraryState>> {
        let mut stmt = self.conn.prepare(
            "SELECT library_id, last_sync, in_progress, progress
             FROM library_sync_state ORDER BY library_id",
        )?;
        let rows = stmt.query_map([], row_to_state)?;
        let mut states = Vec::new();
        for row in rows {
            states.push(row?);
        }
        Ok(states)
    }
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<LibraryState> {
    let library: String = row.get(0)?;
    let last_sync: Option<String> = row.get(1)?;
    let in_progress: i32 = row.get(2)?;
    let progress: f64 = row.get(3)?;
    Ok(LibraryState {
        library: LibraryId::new(library),
        last_sync: last_sync.and_then(|t| {
            DateTime::parse_from_rfc3339(&t)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        }),
        in_progress: in_progress != 0,
        progress: progress as f32,
    })
}

/// Async facade over the sync state database.
#[derive(Clone)]
pub struct AsyncStateDatabase {
    inner: Arc<RwLock<StateDatabase>>,
}

impl AsyncStateDatabase {
    pub async fn open(path: &Path) -> Result<Self> {
        let db = StateDatabase::open(path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(db)),
        })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let db = StateDatabase::open_in_memory()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(db)),
        })
    }

    pub async fn get(&self, library: &LibraryId) -> Result<Option<LibraryState>> {
        self.inner.read().await.get(library)
    }

    pub async fn all(&self) -> Result<Vec<LibraryState>> {
        self.inner.read().await.all()
    }

    pub async fn upsert(&self, state: &LibraryState) -> Result<()> {
        let mut db = self.inner.write().await;
        db.upsert(state)
    }

    /// Marks a cycle started: in progress, progress back to zero.
    pub async fn begin_sync(&self, library: &LibraryId) -> Result<()> {
        let mut db = self.inner.write().await;
        let mut state = db
            .get(library)?
            .unwrap_or_else(|| LibraryState::new(library.clone()));
        state.in_progress = true;
        state.progress = 0.0;
        db.upsert(&state)
    }

    /// Records live progress for a cycle in flight.
    pub async fn update_progress(&self, library: &LibraryId, progress: f32) -> Result<()> {
        let mut db = self.inner.write().await;
        let mut state = db
            .get(library)?
            .unwrap_or_else(|| LibraryState::new(library.clone()));
        state.progress = progress.clamp(0.0, 1.0);
        db.upsert(&state)
    }

    /// Marks a cycle completed at `finished_at`.
    pub async fn finish_sync(&self, library: &LibraryId, finished_at: DateTime<Utc>) -> Result<()> {
        let mut db = self.inner.write().await;
        let mut state = db
            .get(library)?
            .unwrap_or_else(|| LibraryState::new(library.clone()));
        state.last_sync = Some(finished_at);
        state.in_progress = false;
        state.progress = 1.0;
        db.upsert(&state)
    }

    /// Marks a cycle aborted: not in progress, progress reset, the last
    /// successful sync timestamp untouched.
    pub async fn abort_sync(&self, library: &LibraryId) -> Result<()> {
        let mut db = self.inner.write().await;
        let mut state = db
            .get(library)?
            .unwrap_or_else(|| LibraryState::new(library.clone()));
        state.in_progress = false;
        state.progress = 0.0;
        db.upsert(&state)
    }
}
