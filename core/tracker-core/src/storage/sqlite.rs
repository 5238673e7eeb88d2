//! SQLite backend for both the session record and the event queue.
//!
//! One database file holds two tables:
//!
//! ```text
//! events  (id INTEGER PRIMARY KEY AUTOINCREMENT, event TEXT)  -- queue, JSON payloads
//! session (id INTEGER PRIMARY KEY CHECK (id = 0), data TEXT)  -- at most one row
//! ```
//!
//! The connection sits behind a mutex so one handle can be shared by several
//! session state machines and an emitter. Other processes opening the same
//! file are coordinated by SQLite itself (WAL + busy timeout); every public
//! method is a single statement or a single transaction.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use fs_err as fs;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use tracker_protocol::{Payload, StorageMechanism};

use super::{EventRow, EventStore, SessionStore};
use crate::error::StorageError;

// Stays below SQLITE_MAX_VARIABLE_NUMBER on old builds.
const DELETE_CHUNK: usize = 500;

pub struct SqliteStorage {
    db_name: String,
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// Missing parent directories are created. Fails if the path cannot hold
    /// a database, e.g. when it names a directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let open_error = |source| StorageError::Open {
            path: path.to_path_buf(),
            source,
        };

        let conn = Connection::open_with_flags(path, flags).map_err(open_error)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(open_error)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(open_error)?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(open_error)?;

        let storage = SqliteStorage {
            db_name: path.to_string_lossy().into_owned(),
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;

        tracing::debug!(db = %storage.db_name, "Opened sqlite storage");
        Ok(storage)
    }

    /// Private database that lives as long as this handle.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = SqliteStorage {
            db_name: ":memory:".to_string(),
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// The path this store was opened with.
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Test helper: Store arbitrary text as the session blob.
    /// Only available with the `test-helpers` feature or in tests.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn set_raw_session_for_test(&self, raw: &str) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO session (id, data) VALUES (0, ?1) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![raw],
            )?;
            Ok(())
        })
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS session (
                    id INTEGER PRIMARY KEY CHECK (id = 0),
                    data TEXT NOT NULL
                 );
                 COMMIT;",
            )?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        // A panic mid-statement leaves the connection usable; SQLite rolls
        // back anything uncommitted.
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut conn)
    }
}

fn query_event_rows(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<EventRow>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, raw) = row?;
        let event = serde_json::from_str::<Payload>(&raw)
            .map_err(|source| StorageError::Decode { id, source })?;
        events.push(EventRow { id, event });
    }
    Ok(events)
}

impl SessionStore for SqliteStorage {
    fn get_session(&self) -> Result<Option<Value>, StorageError> {
        let raw: Option<String> = self.with_connection(|conn| {
            Ok(conn
                .query_row("SELECT data FROM session WHERE id = 0", [], |row| {
                    row.get(0)
                })
                .optional()?)
        })?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        // Defensive: unreadable blob → no session (caller starts fresh)
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    db = %self.db_name,
                    error = %e,
                    "Stored session is not valid JSON, treating as absent"
                );
                Ok(None)
            }
        }
    }

    fn set_session(&self, session: &Value) -> Result<(), StorageError> {
        let data = serde_json::to_string(session)?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO session (id, data) VALUES (0, ?1) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![data],
            )?;
            Ok(())
        })
    }

    fn delete_session(&self) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM session", [])?;
            Ok(())
        })
    }

    fn storage_mechanism(&self) -> StorageMechanism {
        StorageMechanism::Sqlite
    }
}

impl EventStore for SqliteStorage {
    fn insert_event_row(&self, payload: &Payload) -> Result<i64, StorageError> {
        let event = serde_json::to_string(payload)?;
        self.with_connection(|conn| {
            conn.execute("INSERT INTO events (event) VALUES (?1)", params![event])?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn select_event_rows(&self, limit: usize) -> Result<Vec<EventRow>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(|conn| {
            query_event_rows(
                conn,
                "SELECT id, event FROM events ORDER BY id ASC LIMIT ?1",
                params![limit],
            )
        })
    }

    fn select_all_event_rows(&self) -> Result<Vec<EventRow>, StorageError> {
        self.with_connection(|conn| {
            query_event_rows(conn, "SELECT id, event FROM events ORDER BY id ASC", [])
        })
    }

    fn delete_event_rows(&self, ids: &[i64]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }

        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            for chunk in ids.chunks(DELETE_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!("DELETE FROM events WHERE id IN ({})", placeholders);
                tx.execute(&sql, params_from_iter(chunk.iter()))?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn count_event_rows(&self) -> Result<u64, StorageError> {
        let count: i64 = self.with_connection(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn delete_all_event_rows(&self) -> Result<(), StorageError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM events", [])?;
            Ok(())
        })
    }
}
