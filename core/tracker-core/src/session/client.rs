use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracker_protocol::{ClientSessionData, SelfDescribingJson};
use uuid::Uuid;

use super::record::{SessionState, Step};
use crate::config::SessionConfiguration;
use crate::error::{SessionError, StorageError};
use crate::storage::{SessionStore, SqliteStorage};

/// Per-instance bookkeeping. Session data itself is never cached here; every
/// transition re-reads the store.
#[derive(Debug, Default)]
struct Guarded {
    is_background: bool,
    /// Last user id this instance read or generated, reused when the stored
    /// record turns out to be unusable.
    user_id: Option<String>,
    /// Set after the first committed transition. Until then the next event
    /// opens a new session.
    has_transitioned: bool,
}

/// Session state machine for one tracker.
///
/// All methods take `&self`; share an instance across producer threads with
/// `Arc`. Transitions on one instance are strictly ordered. Separate instances
/// pointed at the same store are not serialized against each other.
pub struct ClientSession {
    store: Arc<dyn SessionStore>,
    foreground_timeout: Duration,
    background_timeout: Duration,
    guard: Mutex<Guarded>,
}

impl ClientSession {
    pub fn new(
        store: Arc<dyn SessionStore>,
        foreground_timeout: Duration,
        background_timeout: Duration,
    ) -> Self {
        ClientSession {
            store,
            foreground_timeout,
            background_timeout,
            guard: Mutex::new(Guarded::default()),
        }
    }

    /// Opens the configured SQLite database and builds a session on top of it.
    pub fn from_config(config: &SessionConfiguration) -> Result<Self, StorageError> {
        let storage = SqliteStorage::open(&config.db_path)?;
        Ok(ClientSession::new(
            Arc::new(storage),
            config.foreground_timeout(),
            config.background_timeout(),
        ))
    }

    /// Assigns the event to a session and returns the `client_session`
    /// context describing it.
    ///
    /// The returned context is only produced after the updated record has
    /// been written. On error nothing about the session has changed.
    pub fn update_and_get_session_context(
        &self,
        event_id: &str,
        event_timestamp_ms: i64,
    ) -> Result<SelfDescribingJson<ClientSessionData>, SessionError> {
        let mut guard = self.lock();

        let raw = self.store.get_session().map_err(SessionError::Load)?;
        let state = SessionState::from_stored(raw);

        let fallback_user_id = guard
            .user_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let new_session_id = Uuid::new_v4().to_string();
        let timeout = if guard.is_background {
            self.background_timeout
        } else {
            self.foreground_timeout
        };

        let step = Step {
            event_id,
            event_timestamp_ms,
            now_ms: Utc::now().timestamp_millis(),
            timeout,
            is_background: guard.is_background,
            force_new_session: !guard.has_transitioned,
            fallback_user_id: &fallback_user_id,
            new_session_id: &new_session_id,
        };
        let record = state.advance(&step);

        let value = record
            .to_value()
            .map_err(|e| SessionError::Persist(StorageError::Encode(e)))?;
        self.store.set_session(&value).map_err(SessionError::Persist)?;

        if record.event_index == 1 {
            tracing::info!(
                session_id = %record.session_id,
                session_index = record.session_index,
                previous_session_id = ?record.previous_session_id,
                background = guard.is_background,
                "Started new session"
            );
        } else {
            tracing::debug!(
                session_id = %record.session_id,
                event_index = record.event_index,
                "Continuing session"
            );
        }

        guard.user_id = Some(record.user_id.clone());
        guard.has_transitioned = true;

        Ok(record.to_context(self.store.storage_mechanism()))
    }

    /// Marks the app as backgrounded or foregrounded. Only changes which
    /// timeout the next transition uses.
    pub fn set_is_background(&self, is_background: bool) {
        let mut guard = self.lock();
        if guard.is_background != is_background {
            tracing::debug!(is_background, "Lifecycle state changed");
        }
        guard.is_background = is_background;
    }

    pub fn get_is_background(&self) -> bool {
        self.lock().is_background
    }

    pub fn get_foreground_timeout(&self) -> Duration {
        self.foreground_timeout
    }

    pub fn get_background_timeout(&self) -> Duration {
        self.background_timeout
    }

    fn lock(&self) -> MutexGuard<'_, Guarded> {
        // Guarded holds plain flags, always consistent even after a panic.
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tracker_protocol::StorageMechanism;

    /// Store whose reads or writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        session: Mutex<Option<Value>>,
        fail_reads: bool,
        fail_writes: bool,
    }

    fn io_error() -> StorageError {
        StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
    }

    impl SessionStore for FlakyStore {
        fn get_session(&self) -> Result<Option<Value>, StorageError> {
            if self.fail_reads {
                return Err(io_error());
            }
            Ok(self.session.lock().unwrap().clone())
        }

        fn set_session(&self, session: &Value) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(io_error());
            }
            *self.session.lock().unwrap() = Some(session.clone());
            Ok(())
        }

        fn delete_session(&self) -> Result<(), StorageError> {
            *self.session.lock().unwrap() = None;
            Ok(())
        }

        fn storage_mechanism(&self) -> StorageMechanism {
            StorageMechanism::Sqlite
        }
    }

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn test_timeouts_are_reported() {
        let cs = ClientSession::new(
            Arc::new(FlakyStore::default()),
            Duration::from_millis(101),
            Duration::from_millis(102),
        );
        assert_eq!(cs.get_foreground_timeout(), Duration::from_millis(101));
        assert_eq!(cs.get_background_timeout(), Duration::from_millis(102));
    }

    #[test]
    fn test_background_flag_defaults_to_foreground() {
        let cs = ClientSession::new(Arc::new(FlakyStore::default()), LONG, LONG);
        assert!(!cs.get_is_background());
        cs.set_is_background(true);
        assert!(cs.get_is_background());
    }

    #[test]
    fn test_toggling_background_does_not_force_rollover() {
        let cs = ClientSession::new(Arc::new(FlakyStore::default()), LONG, LONG);
        let first = cs.update_and_get_session_context("e1", 1).unwrap();
        cs.set_is_background(true);
        cs.set_is_background(false);
        let second = cs.update_and_get_session_context("e2", 2).unwrap();
        assert_eq!(first.data.session_id, second.data.session_id);
        assert_eq!(second.data.event_index, 2);
    }

    #[test]
    fn test_failed_write_is_reported_and_commits_nothing() {
        let store = Arc::new(FlakyStore {
            fail_writes: true,
            ..Default::default()
        });
        let cs = ClientSession::new(store.clone(), LONG, LONG);

        let result = cs.update_and_get_session_context("e1", 1);
        assert!(matches!(result, Err(SessionError::Persist(_))));
        assert!(store.session.lock().unwrap().is_none());
    }

    #[test]
    fn test_failed_read_is_reported() {
        let store = Arc::new(FlakyStore {
            fail_reads: true,
            ..Default::default()
        });
        let cs = ClientSession::new(store, LONG, LONG);
        assert!(matches!(
            cs.update_and_get_session_context("e1", 1),
            Err(SessionError::Load(_))
        ));
    }

    #[test]
    fn test_failed_write_leaves_first_transition_pending() {
        let stored = json!({
            "userId": "u", "sessionId": "s", "sessionIndex": 3, "eventIndex": 2,
            "firstEventId": "f", "firstEventTimestamp": 0,
            "lastAccessTime": Utc::now().timestamp_millis()
        });
        let failing = FlakyStore {
            session: Mutex::new(Some(stored)),
            fail_writes: true,
            ..Default::default()
        };
        let cs = ClientSession::new(Arc::new(failing), LONG, LONG);
        assert!(cs.update_and_get_session_context("e1", 1).is_err());
        assert!(!cs.lock().has_transitioned);
    }

    #[test]
    fn test_corrupt_record_reuses_known_user_id() {
        let store = Arc::new(FlakyStore::default());
        let cs = ClientSession::new(store.clone(), LONG, LONG);

        let first = cs.update_and_get_session_context("e1", 1).unwrap();
        store.set_session(&json!({"garbage": true})).unwrap();
        let second = cs.update_and_get_session_context("e2", 2).unwrap();

        assert_eq!(second.data.user_id, first.data.user_id);
        assert_eq!(second.data.session_index, 1);
        assert_eq!(second.data.event_index, 1);
        assert_ne!(second.data.session_id, first.data.session_id);
        assert_eq!(second.data.previous_session_id, None);
    }

    #[test]
    fn test_fresh_instance_continues_stored_counters() {
        let store = Arc::new(FlakyStore::default());
        let first = ClientSession::new(store.clone(), LONG, LONG)
            .update_and_get_session_context("e1", 1)
            .unwrap();

        let second = ClientSession::new(store, LONG, LONG)
            .update_and_get_session_context("e2", 2)
            .unwrap();

        assert_eq!(second.data.session_index, first.data.session_index + 1);
        assert_eq!(second.data.user_id, first.data.user_id);
        assert_eq!(
            second.data.previous_session_id.as_deref(),
            Some(first.data.session_id.as_str())
        );
    }
}
