//! Structured logging for applications embedding the tracker.
//!
//! The core only emits `tracing` events. Hosts that do not install their own
//! subscriber can call [`init`] to write `tracker-debug.{date}.log` files with
//! daily rotation (7 days kept) into a directory of their choice. Log level is
//! controlled via the `RUST_LOG` env var.
//!
//! Falls back to stderr logging if file appender creation fails. Calling
//! [`init`] when a global subscriber already exists is a no-op.

use fs_err as fs;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "tracker_core=info";

pub fn init(log_dir: &Path) {
    let _ = fs::create_dir_all(log_dir);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match create_file_appender(log_dir) {
        Ok(file_appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // The writer thread must outlive every log call; keep the guard
            // for the rest of the process once our subscriber is installed.
            if try_install(env_filter, non_blocking, false) {
                std::mem::forget(guard);
            }
        }
        Err(_) => {
            try_install(env_filter, std::io::stderr, true);
        }
    }
}

/// Installs the global subscriber. Returns false if one already exists.
fn try_install<W>(env_filter: EnvFilter, writer: W, ansi: bool) -> bool
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_ansi(ansi),
        )
        .try_init()
        .is_ok()
}

fn create_file_appender(
    log_dir: &Path,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("tracker-debug")
        .filename_suffix("log")
        .max_log_files(7)
        .build(log_dir)
}
