//! Error taxonomy for the tracker core.
//!
//! Two families matter to callers:
//! - [`StorageError`]: the durable medium failed. Always propagated.
//! - [`SessionError`]: a session transition could not be read or committed.
//!   The returned context must not be trusted, since nothing was persisted.
//!
//! [`InvalidSessionRecord`] never reaches callers. The state machine logs it
//! and starts a fresh session instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to decode event row {id}: {source}")]
    Decode {
        id: i64,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted session data that exists but cannot be used.
#[derive(Error, Debug)]
pub enum InvalidSessionRecord {
    #[error("session record is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("session record has zero {0}")]
    ZeroIndex(&'static str),

    #[error("session record has empty {0}")]
    EmptyField(&'static str),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to load session record: {0}")]
    Load(#[source] StorageError),

    #[error("Failed to persist session record: {0}")]
    Persist(#[source] StorageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Home directory not found")]
    NoHomeDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
