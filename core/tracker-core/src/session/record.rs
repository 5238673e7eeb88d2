//! The persisted session record and its pure transition rules.
//!
//! A record is never edited in place. Each tracked event produces a new
//! [`SessionRecord`] from the previous [`SessionState`], which the caller then
//! writes back as a whole. If that write fails the new value is simply
//! dropped.
//!
//! Two clocks are involved and must not be mixed:
//! - `last_access_time` is real wall-clock time and drives expiry.
//! - `first_event_timestamp` is whatever the caller stamped on the event and
//!   is only reported, never compared against a timeout.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracker_protocol::{
    format_timestamp_ms, ClientSessionData, SelfDescribingJson, StorageMechanism,
    CLIENT_SESSION_SCHEMA,
};

use crate::error::InvalidSessionRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub previous_session_id: Option<String>,
    pub session_index: u64,
    pub event_index: u64,
    pub first_event_id: String,
    /// Caller-supplied event time, epoch milliseconds.
    pub first_event_timestamp: i64,
    /// Wall clock at the last transition, epoch milliseconds.
    pub last_access_time: i64,
    /// Lifecycle state at the last transition. Informational only: expiry
    /// always uses the live flag carried in [`Step::is_background`].
    #[serde(default)]
    pub is_background: bool,
}

/// What the state machine knows after reading the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No record, or one that failed validation.
    Uninitialized,
    Active(SessionRecord),
}

/// Inputs to one transition.
#[derive(Debug, Clone)]
pub struct Step<'a> {
    pub event_id: &'a str,
    pub event_timestamp_ms: i64,
    pub now_ms: i64,
    /// Timeout for the current foreground/background mode.
    pub timeout: Duration,
    pub is_background: bool,
    /// Start a new session even if the current one has not expired.
    pub force_new_session: bool,
    /// Identity to use when there is no valid record to take it from.
    pub fallback_user_id: &'a str,
    /// Id for the session, used only if a new one starts.
    pub new_session_id: &'a str,
}

impl SessionRecord {
    /// Parses and validates a stored blob.
    pub fn from_value(value: Value) -> Result<Self, InvalidSessionRecord> {
        let record: SessionRecord = serde_json::from_value(value)?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), InvalidSessionRecord> {
        if self.user_id.is_empty() {
            return Err(InvalidSessionRecord::EmptyField("userId"));
        }
        if self.session_id.is_empty() {
            return Err(InvalidSessionRecord::EmptyField("sessionId"));
        }
        if self.session_index == 0 {
            return Err(InvalidSessionRecord::ZeroIndex("sessionIndex"));
        }
        if self.event_index == 0 {
            return Err(InvalidSessionRecord::ZeroIndex("eventIndex"));
        }
        Ok(())
    }

    /// True once `timeout` of wall-clock time has passed since the last
    /// transition. A clock that went backwards never expires a session.
    pub fn is_expired(&self, now_ms: i64, timeout: Duration) -> bool {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let elapsed = now_ms.saturating_sub(self.last_access_time);
        elapsed >= 0 && elapsed >= timeout_ms
    }

    pub fn to_context(
        &self,
        storage_mechanism: StorageMechanism,
    ) -> SelfDescribingJson<ClientSessionData> {
        SelfDescribingJson::new(
            CLIENT_SESSION_SCHEMA,
            ClientSessionData {
                user_id: self.user_id.clone(),
                session_id: self.session_id.clone(),
                previous_session_id: self.previous_session_id.clone(),
                session_index: self.session_index,
                event_index: self.event_index,
                storage_mechanism,
                first_event_id: self.first_event_id.clone(),
                first_event_timestamp: format_timestamp_ms(self.first_event_timestamp),
            },
        )
    }
}

impl SessionState {
    /// Classifies whatever the store returned. Invalid data is logged and
    /// treated as if nothing were stored.
    pub fn from_stored(raw: Option<Value>) -> Self {
        let Some(raw) = raw else {
            return SessionState::Uninitialized;
        };

        match SessionRecord::from_value(raw) {
            Ok(record) => SessionState::Active(record),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding invalid session record");
                SessionState::Uninitialized
            }
        }
    }

    pub fn record(&self) -> Option<&SessionRecord> {
        match self {
            SessionState::Active(record) => Some(record),
            SessionState::Uninitialized => None,
        }
    }

    /// Computes the record that follows this state for one event.
    pub fn advance(&self, step: &Step<'_>) -> SessionRecord {
        match self {
            SessionState::Uninitialized => SessionRecord {
                user_id: step.fallback_user_id.to_string(),
                session_id: step.new_session_id.to_string(),
                previous_session_id: None,
                session_index: 1,
                event_index: 1,
                first_event_id: step.event_id.to_string(),
                first_event_timestamp: step.event_timestamp_ms,
                last_access_time: step.now_ms,
                is_background: step.is_background,
            },
            SessionState::Active(current)
                if step.force_new_session || current.is_expired(step.now_ms, step.timeout) =>
            {
                SessionRecord {
                    user_id: current.user_id.clone(),
                    session_id: step.new_session_id.to_string(),
                    previous_session_id: Some(current.session_id.clone()),
                    session_index: current.session_index.saturating_add(1),
                    event_index: 1,
                    first_event_id: step.event_id.to_string(),
                    first_event_timestamp: step.event_timestamp_ms,
                    last_access_time: step.now_ms,
                    is_background: step.is_background,
                }
            }
            SessionState::Active(current) => SessionRecord {
                event_index: current.event_index.saturating_add(1),
                last_access_time: step.now_ms,
                is_background: step.is_background,
                ..current.clone()
            },
        }
    }
}
