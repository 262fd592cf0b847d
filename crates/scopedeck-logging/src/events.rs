use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured log events for acquisition sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    SessionStarted {
        mode: String,
        stream_duration: f64,
        buffer_duration: f64,
        requested_interval: f64,
    },
    IntervalNegotiated {
        requested: f64,
        actual: f64,
    },
    OverflowDetected {
        mode: String,
        count: u32,
    },
    AlertCleared,
    /// The backend stopped streaming on its own and setup was re-issued
    StreamRestarted {
        iteration: u64,
    },
    StopRequested,
    SessionFinished {
        outcome: String,
        iterations: u64,
        warnings: u32,
        duration_secs: f64,
    },
    RemoteCallFailed {
        op: String,
        error: String,
    },
    ReconnectAttempted {
        success: bool,
        error: Option<String>,
    },
    BufferSaved {
        success: bool,
        title: String,
        body: String,
    },
    DirectorySelected {
        path: String,
    },
    ChartRefreshed {
        points: usize,
        /// Peak absolute voltage per channel
        peaks: BTreeMap<String, f64>,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for session events - handles both console output and file logging
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let json = event.with_timestamp();
                let _ = writeln!(file, "{}", json);
            }
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::SessionStarted {
                mode,
                buffer_duration,
                requested_interval,
                ..
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} {} {}",
                    "▶".bright_cyan(),
                    mode.to_uppercase().bright_cyan().bold(),
                    format!(
                        "window {}s @ {}",
                        buffer_duration,
                        Self::format_rate(1.0 / requested_interval)
                    )
                    .dimmed()
                );
            }
            LogEvent::IntervalNegotiated { requested, actual } => {
                if (requested - actual).abs() > f64::EPSILON * requested.abs().max(1.0) {
                    let _ = writeln!(
                        stderr,
                        "    {} Instrument adjusted rate to {}",
                        "~".bright_yellow(),
                        Self::format_rate(1.0 / actual)
                    );
                } else {
                    let _ = writeln!(
                        stderr,
                        "    {} Sampling at {}",
                        "✓".bright_green(),
                        Self::format_rate(1.0 / actual)
                    );
                }
            }
            LogEvent::OverflowDetected { count, .. } => {
                let _ = writeln!(
                    stderr,
                    "    {} Overflow or voltage out of range! x{}",
                    "⚠".bright_yellow(),
                    count
                );
            }
            LogEvent::AlertCleared => {
                let _ = writeln!(stderr, "    {}", "Overflow scrolled out of view".dimmed());
            }
            LogEvent::StreamRestarted { .. } => {
                let _ = writeln!(
                    stderr,
                    "    {} {}",
                    "↻".bright_blue(),
                    "Restarting live streaming".dimmed()
                );
            }
            LogEvent::StopRequested => {
                let _ = writeln!(
                    stderr,
                    "    {} Stopping after the current poll...",
                    "■".bright_yellow()
                );
            }
            LogEvent::SessionFinished {
                outcome,
                iterations,
                warnings,
                duration_secs,
            } => {
                let status = match outcome.as_str() {
                    "completed" | "stopped" => format!("✓ {}", outcome).bright_green(),
                    "rejected" => format!("- {}", outcome).dimmed(),
                    _ => format!("✗ {}", outcome).bright_red(),
                };
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    status,
                    format!(
                        "({} polls, {} warnings, {:.1}s)",
                        iterations, warnings, duration_secs
                    )
                    .dimmed()
                );
            }
            LogEvent::RemoteCallFailed { op, error } => {
                let _ = writeln!(
                    stderr,
                    "{} Backend call '{}' failed: {}",
                    "✗".bright_red(),
                    op,
                    error.bright_red()
                );
            }
            LogEvent::ReconnectAttempted { success, error } => {
                if *success {
                    let _ = writeln!(stderr, "    {} Reconnected to instrument", "↻".bright_green());
                } else {
                    let _ = writeln!(
                        stderr,
                        "    {} Reconnect failed: {}",
                        "↻".bright_red(),
                        error.as_deref().unwrap_or("unknown error").dimmed()
                    );
                }
            }
            LogEvent::BufferSaved {
                success,
                title,
                body,
            } => {
                let mark = if *success {
                    "✓".bright_green()
                } else {
                    "✗".bright_red()
                };
                let _ = writeln!(stderr, "  {} {} {}", mark, title.bold(), body.dimmed());
            }
            LogEvent::DirectorySelected { path } => {
                let _ = writeln!(stderr, "  {} {}", "📁".dimmed(), path);
            }
            LogEvent::ChartRefreshed { .. } => {
                // Too chatty for pretty mode; the console redraws its own status line
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::SessionStarted { mode, .. } => format!("[{}] session:start:{}", timestamp, mode),
            LogEvent::IntervalNegotiated { requested, actual } => {
                format!("[{}] interval:{:e}->{:e}", timestamp, requested, actual)
            }
            LogEvent::OverflowDetected { mode, count } => {
                format!("[{}] overflow:{}:{}", timestamp, mode, count)
            }
            LogEvent::AlertCleared => format!("[{}] alert:clear", timestamp),
            LogEvent::StreamRestarted { iteration } => {
                format!("[{}] stream:restart:{}", timestamp, iteration)
            }
            LogEvent::StopRequested => format!("[{}] stop:requested", timestamp),
            LogEvent::SessionFinished {
                outcome,
                iterations,
                warnings,
                duration_secs,
            } => format!(
                "[{}] session:{} polls={} warnings={} {:.1}s",
                timestamp, outcome, iterations, warnings, duration_secs
            ),
            LogEvent::RemoteCallFailed { op, error } => {
                format!("[{}] error:{}:{}", timestamp, op, error)
            }
            LogEvent::ReconnectAttempted { success, .. } => {
                format!("[{}] reconnect:{}", timestamp, if *success { "ok" } else { "failed" })
            }
            LogEvent::BufferSaved { success, body, .. } => format!(
                "[{}] save:{}:{}",
                timestamp,
                if *success { "ok" } else { "failed" },
                body
            ),
            LogEvent::DirectorySelected { path } => format!("[{}] dir:{}", timestamp, path),
            LogEvent::ChartRefreshed { .. } => return, // Skip in compact mode
        };
        let _ = writeln!(stderr, "{}", msg);
    }

    /// Human-readable sample rate, e.g. `10 MHz`
    pub fn format_rate(hz: f64) -> String {
        if hz >= 1e6 {
            format!("{:.3} MHz", hz / 1e6)
        } else if hz >= 1e3 {
            format!("{:.3} kHz", hz / 1e3)
        } else {
            format!("{:.3} Hz", hz)
        }
    }
}
