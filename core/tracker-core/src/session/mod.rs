//! Client session state machine: which session does this event belong to?
//!
//! [`ClientSession`] reads the stored record, decides between continuing the
//! current session and opening a new one, writes the result back, and hands
//! out a `client_session` context. The decision rules are pure and live in
//! [`SessionState::advance`].

mod client;
mod record;

pub use client::ClientSession;
pub use record::{SessionRecord, SessionState, Step};
