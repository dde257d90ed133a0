// ABOUTME: SQLite-backed snapshot store with one row per (session_id, tag).
// ABOUTME: Upserts are single statements, so every put/get/delete is atomic on its own.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use ulid::Ulid;

use crate::store::{ComponentTag, SnapshotStore, StoreError};

/// A snapshot store kept in a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// A private in-memory database. Contents vanish with the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS components (
                session_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                bytes BLOB NOT NULL,
                PRIMARY KEY (session_id, tag)
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

impl SnapshotStore for SqliteStore {
    fn put(&self, session_id: &Ulid, tag: ComponentTag, bytes: &[u8]) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO components (session_id, tag, bytes)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, tag) DO UPDATE SET
                bytes = excluded.bytes",
            params![session_id.to_string(), tag.as_str(), bytes],
        )?;
        Ok(())
    }

    fn get(&self, session_id: &Ulid, tag: ComponentTag) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT bytes FROM components WHERE session_id = ?1 AND tag = ?2")?;

        let bytes = stmt
            .query_row(params![session_id.to_string(), tag.as_str()], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;

        Ok(bytes)
    }

    fn delete(&self, session_id: &Ulid, tag: ComponentTag) -> Result<(), StoreError> {
        self.conn()?.execute(
            "DELETE FROM components WHERE session_id = ?1 AND tag = ?2",
            params![session_id.to_string(), tag.as_str()],
        )?;
        Ok(())
    }

    fn sessions(&self) -> Result<Vec<Ulid>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM components WHERE tag = ?1 ORDER BY session_id ASC",
        )?;

        let rows = stmt.query_map(params![ComponentTag::Header.as_str()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let id = row?;
            match id.parse::<Ulid>() {
                Ok(session_id) => sessions.push(session_id),
                Err(_) => tracing::warn!("skipping non-ULID session id in sqlite store: {}", id),
            }
        }
        Ok(sessions)
    }
}
