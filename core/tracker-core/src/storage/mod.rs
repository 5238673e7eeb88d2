//! Durable local storage: one session record and an append-only event queue.
//!
//! The two record families are independent. The session state machine only
//! touches [`SessionStore`]; the emitter only touches [`EventStore`]. A single
//! backend such as [`SqliteStorage`] usually implements both so they share
//! one file.
//!
//! Stores hold no business logic. The session blob is opaque JSON here and is
//! validated by the state machine.

mod sqlite;

use serde_json::Value;
use tracker_protocol::{Payload, StorageMechanism};

use crate::error::StorageError;

pub use sqlite::SqliteStorage;

/// A queued event awaiting delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    /// Store-assigned, increasing with insertion order.
    pub id: i64,
    pub event: Payload,
}

/// Storage for the single, wholesale-replaced session record.
pub trait SessionStore: Send + Sync {
    /// Returns the stored session blob, if one exists and is readable JSON.
    fn get_session(&self) -> Result<Option<Value>, StorageError>;

    /// Replaces the stored session blob.
    fn set_session(&self, session: &Value) -> Result<(), StorageError>;

    fn delete_session(&self) -> Result<(), StorageError>;

    /// Tag reported in session contexts as `storageMechanism`.
    fn storage_mechanism(&self) -> StorageMechanism;
}

/// Insertion-ordered queue of outbound event payloads.
pub trait EventStore: Send + Sync {
    fn insert_event_row(&self, payload: &Payload) -> Result<i64, StorageError>;

    /// Oldest rows first, at most `limit` of them.
    fn select_event_rows(&self, limit: usize) -> Result<Vec<EventRow>, StorageError>;

    fn select_all_event_rows(&self) -> Result<Vec<EventRow>, StorageError>;

    /// Removes acknowledged rows. Unknown ids are ignored.
    fn delete_event_rows(&self, ids: &[i64]) -> Result<(), StorageError>;

    fn count_event_rows(&self) -> Result<u64, StorageError>;

    fn delete_all_event_rows(&self) -> Result<(), StorageError>;
}
