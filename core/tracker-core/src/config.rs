//! Session configuration: where the database lives and how long sessions last.
//!
//! Stored as camelCase JSON, by default in `~/.tracker/session.json`:
//!
//! ```json
//! { "dbPath": "/home/me/.tracker/tracker.db",
//!   "foregroundTimeoutMs": 1800000,
//!   "backgroundTimeoutMs": 1800000 }
//! ```
//!
//! Reads are best-effort; missing keys take defaults and a malformed file
//! yields the default configuration so tracking keeps working.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Thirty minutes, for both foreground and background.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30 * 60 * 1000;

const TRACKER_DIR: &str = ".tracker";
const DB_FILE: &str = "tracker.db";
const CONFIG_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfiguration {
    pub db_path: PathBuf,
    pub foreground_timeout_ms: u64,
    pub background_timeout_ms: u64,
}

impl Default for SessionConfiguration {
    fn default() -> Self {
        SessionConfiguration {
            db_path: default_db_path().unwrap_or_else(|| PathBuf::from(DB_FILE)),
            foreground_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            background_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        }
    }
}

impl SessionConfiguration {
    pub fn new(
        db_path: impl Into<PathBuf>,
        foreground_timeout: Duration,
        background_timeout: Duration,
    ) -> Self {
        SessionConfiguration {
            db_path: db_path.into(),
            foreground_timeout_ms: duration_to_ms(foreground_timeout),
            background_timeout_ms: duration_to_ms(background_timeout),
        }
    }

    pub fn foreground_timeout(&self) -> Duration {
        Duration::from_millis(self.foreground_timeout_ms)
    }

    pub fn background_timeout(&self) -> Duration {
        Duration::from_millis(self.background_timeout_ms)
    }

    /// Loads from `path`, returning defaults if the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, "Failed to read session config, using defaults");
                }
                return SessionConfiguration::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse session config, using defaults"
                );
                SessionConfiguration::default()
            }
        }
    }

    /// Writes pretty JSON to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Returns the tracker data directory (`~/.tracker`).
pub fn get_tracker_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(TRACKER_DIR))
}

/// Returns the default database path (`~/.tracker/tracker.db`).
pub fn default_db_path() -> Option<PathBuf> {
    get_tracker_dir().map(|d| d.join(DB_FILE))
}

/// Returns the default configuration file path (`~/.tracker/session.json`).
pub fn get_config_path() -> Option<PathBuf> {
    get_tracker_dir().map(|d| d.join(CONFIG_FILE))
}

/// Loads the configuration from the default location.
pub fn load_session_config() -> SessionConfiguration {
    match get_config_path() {
        Some(path) => SessionConfiguration::load(&path),
        None => SessionConfiguration::default(),
    }
}

/// Saves the configuration to the default location.
pub fn save_session_config(config: &SessionConfiguration) -> Result<(), ConfigError> {
    let path = get_config_path().ok_or(ConfigError::NoHomeDir)?;
    config.save(&path)
}
