//! # scopedeck-logging
//!
//! Logging for the scopedeck acquisition console.
//!
//! ## Key Types
//!
//! - [`Logger`] - Structured session event logging
//! - [`LogEvent`] - Log event types
//! - [`LogFormat`] - Output formats (Pretty, JSON, Compact)
//!
//! Diagnostics that are not session events go through `tracing`; call
//! [`init_tracing`] once at startup.

mod events;

pub use events::{LogEvent, LogFormat, Logger};

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the application.
///
/// With `log_dir` set, diagnostics are also written to a daily rolling file
/// there. Keep the returned guard alive until exit so buffered lines flush.
pub fn init_tracing(level: &str, format: LogFormat, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = file_writer(dir);
            let layer = fmt::layer()
                .json()
                .with_target(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty | LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .init();
        }
    }

    guard
}

/// Daily rolling `scopedeck.log` in `dir`, written off-thread. Dropping the
/// guard flushes whatever is still queued.
fn file_writer(dir: &Path) -> (NonBlocking, WorkerGuard) {
    let appender = tracing_appender::rolling::daily(dir, "scopedeck.log");
    tracing_appender::non_blocking(appender)
}
