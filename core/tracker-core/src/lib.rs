//! Client-side session and event-queue state for the tracker.
//!
//! - [`storage`]: durable session record + event queue (SQLite)
//! - [`session`]: session continuity and expiry, guarded for concurrent use
//! - [`config`]: construction settings
//! - [`logging`]: optional `tracing` subscriber for embedding apps

pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod storage;

pub use config::SessionConfiguration;
pub use error::{ConfigError, InvalidSessionRecord, SessionError, StorageError};
pub use session::ClientSession;
pub use storage::{EventRow, EventStore, SessionStore, SqliteStorage};
pub use tracker_protocol::{
    ClientSessionData, Payload, SelfDescribingJson, StorageMechanism, CLIENT_SESSION_SCHEMA,
};
