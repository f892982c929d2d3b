//! Logging system configuration and initialization
//!
//! Console logging via `tracing-subscriber` with an optional non-blocking file
//! layer. Timestamps are rendered in the portal's fixed UTC offset so log
//! lines line up with what the portal shows, independent of host tzdata.
//!
//! The default filter quiets the chatty dependencies; override with
//! `RUST_LOG` as usual, e.g. `RUST_LOG=debug,sqlx=warn,hyper=error`.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{FixedOffset, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking;
use tracing_subscriber::{
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

// Keeps the non-blocking file writer alive for the process lifetime.
static LOG_GUARDS: Lazy<Mutex<Vec<non_blocking::WorkerGuard>>> =
    Lazy::new(|| Mutex::new(Vec::new()));

/// Logging configuration, embedded in the worker config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level for the crate's own logs.
    pub level: String,
    /// Write logs to a file in addition to the console.
    pub file_output: bool,
    /// Directory for the log file; defaults next to the executable.
    pub directory: Option<PathBuf>,
    /// Timestamp offset from UTC in hours.
    pub utc_offset_hours: i32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_output: false,
            directory: None,
            utc_offset_hours: -3,
        }
    }
}

/// Timestamp formatter pinned to a fixed UTC offset.
struct FixedOffsetTime {
    offset: FixedOffset,
}

impl FormatTime for FixedOffsetTime {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let local = Utc::now().with_timezone(&self.offset);
        write!(w, "{}", local.format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

fn default_log_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("logs")
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{level},sqlx=warn,hyper=warn,hyper_util=warn,reqwest=warn,html5ever=error,selectors=error"
        ))
    })
}

/// Initialize the logging system with default configuration.
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize the logging system.
///
/// Must be called once, before the worker starts; a second call fails because
/// the global subscriber is already set.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600)
        .ok_or_else(|| anyhow!("Invalid log timezone offset: {}", config.utc_offset_hours))?;

    let console_layer = fmt::layer()
        .with_timer(FixedOffsetTime { offset })
        .with_target(true);

    let registry = tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(console_layer);

    if config.file_output {
        let log_dir = config
            .directory
            .clone()
            .unwrap_or_else(default_log_directory);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {log_dir:?}: {e}"))?;

        let appender = tracing_appender::rolling::daily(&log_dir, "deskwatch.log");
        let (writer, guard) = non_blocking(appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard mutex poisoned"))?
            .push(guard);

        let file_layer = fmt::layer()
            .with_timer(FixedOffsetTime { offset })
            .with_ansi(false)
            .with_writer(writer);

        registry
            .with(file_layer)
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_portal_offset() {
        let config = LoggingConfig::default();
        assert_eq!(config.utc_offset_hours, -3);
        assert!(!config.file_output);
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let config = LoggingConfig {
            utc_offset_hours: 99,
            ..LoggingConfig::default()
        };
        assert!(init_logging_with_config(&config).is_err());
    }
}
