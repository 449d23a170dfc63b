//! Logging for appmirror
//!
//! The CLI logs to daily files under the XDG state directory
//! (`~/.local/state/appmirror/appmirror.log.<date>`); tests log to the test
//! writer. `RUST_LOG` overrides the configured level in both.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

/// Prefix of the rotated log files; rotation appends the date.
const LOG_FILE_PREFIX: &str = "appmirror.log";

/// Install the file subscriber for the process.
///
/// Keep the returned guard alive until exit; dropping it flushes pending writes.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&config.level)?,
    };

    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!(log_dir = %log_dir.display(), level = %config.level, "Logging initialized");
    Ok(LoggingGuard { _worker: guard })
}

/// Route logs to the test harness. Safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Parse the configured level (or a full directive list such as
/// `info,appmirror_core=debug`).
fn level_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level '{}': {}", level, e)))
}

/// Flushes the background log writer when dropped.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_accepts_directives() {
        assert!(level_filter("debug").is_ok());
        assert!(level_filter("info,appmirror_core::sync=trace").is_ok());
    }

    #[test]
    fn test_level_filter_rejects_bad_level() {
        let err = level_filter("appmirror_core=loud").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
