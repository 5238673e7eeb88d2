//! Serialized types shared between the tracker core and its collaborators.
//!
//! The session state machine produces [`SelfDescribingJson`] contexts that the
//! enrichment pipeline attaches to each event, and the emitter drains
//! [`Payload`] rows from the durable queue. Both sides agree on these shapes,
//! so they live in their own crate with no I/O.
//!
//! **Breaking changes to field names are not allowed**: the camelCase keys
//! below are validated downstream against the published Iglu schemas.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Iglu URI of the client session context entity.
pub const CLIENT_SESSION_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/client_session/jsonschema/1-0-2";

/// A JSON document tagged with the schema it conforms to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfDescribingJson<T = Value> {
    pub schema: String,
    pub data: T,
}

impl<T> SelfDescribingJson<T> {
    pub fn new(schema: impl Into<String>, data: T) -> Self {
        SelfDescribingJson {
            schema: schema.into(),
            data,
        }
    }
}

impl<T: Serialize> SelfDescribingJson<T> {
    /// Erases the typed body into a plain `{"schema", "data"}` value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Persistence technology backing the session record.
///
/// Reported verbatim in every client session context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageMechanism {
    #[serde(rename = "SQLITE")]
    Sqlite,
}

impl StorageMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMechanism::Sqlite => "SQLITE",
        }
    }
}

/// Body of the `client_session/1-0-2` context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSessionData {
    pub user_id: String,
    pub session_id: String,
    /// Absent for the first session a store has ever seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,
    pub session_index: u64,
    pub event_index: u64,
    pub storage_mechanism: StorageMechanism,
    pub first_event_id: String,
    /// ISO-8601, UTC, millisecond precision (`2022-05-20T10:28:55.123Z`).
    pub first_event_timestamp: String,
}

/// Formats epoch milliseconds the way session contexts expect them.
///
/// Out-of-range values collapse to the Unix epoch instead of failing.
pub fn format_timestamp_ms(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Name/value pairs of one tracked event, as queued for the emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, String>);

impl Payload {
    pub fn new() -> Self {
        Payload::default()
    }

    /// Sets `key`, replacing any previous value. Empty values are skipped.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut payload = Payload::new();
        for (k, v) in iter {
            payload.add(k, v);
        }
        payload
    }
}
