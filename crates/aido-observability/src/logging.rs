//! Structured logging with JSON/pretty/compact output and file rotation
//!
//! Console output goes to stderr so that machine-readable command output on
//! stdout is never interleaved with log lines.

use std::io;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{FileLoggingConfig, LogFormat, LoggingConfig, RotationStrategy};
use crate::error::{ObservabilityError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Guard that must be held to keep the async file writer running
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

impl LogGuard {
    fn new(guard: Option<WorkerGuard>) -> Self {
        Self { _guard: guard }
    }
}

/// Initialize logging with the given configuration
///
/// Returns a guard that must be held for the lifetime of the application
/// to ensure logs are flushed properly. Fails if a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let env_filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let guard = match &config.file {
        Some(file_config) => {
            let (writer, guard) = create_file_writer(file_config);
            layers.push(file_layer(config, writer));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| ObservabilityError::LoggingInit(e.to_string()))?;

    Ok(LogGuard::new(guard))
}

/// `RUST_LOG` if set, otherwise the configured directives
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = config.directives();
    EnvFilter::try_new(&directives).map_err(|e| ObservabilityError::InvalidFilter {
        directives,
        reason: e.to_string(),
    })
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Pretty => layer.pretty().with_span_events(FmtSpan::CLOSE).boxed(),
        LogFormat::Json => layer.json().with_span_events(FmtSpan::CLOSE).boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

fn file_layer(config: &LoggingConfig, writer: NonBlocking) -> BoxedLayer {
    fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json()
        .boxed()
}

fn create_file_writer(config: &FileLoggingConfig) -> (NonBlocking, WorkerGuard) {
    let file_appender = match config.rotation {
        RotationStrategy::Daily => {
            tracing_appender::rolling::daily(&config.directory, &config.prefix)
        }
        RotationStrategy::Hourly => {
            tracing_appender::rolling::hourly(&config.directory, &config.prefix)
        }
        RotationStrategy::Never => {
            tracing_appender::rolling::never(&config.directory, &config.prefix)
        }
    };

    tracing_appender::non_blocking(file_appender)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_log_guard_creation() {
        let guard = LogGuard::new(None);
        assert!(guard._guard.is_none());
    }

    #[test]
    fn test_invalid_directives_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            filter_directives: Some("aido=notalevel".to_string()),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            build_filter(&config),
            Err(ObservabilityError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_level_directive_builds() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: LogLevel::Debug,
            ..LoggingConfig::default()
        };
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_file_writer_creates_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileLoggingConfig {
            directory: dir.path().to_path_buf(),
            prefix: "aido-test".to_string(),
            rotation: RotationStrategy::Never,
        };
        let (_writer, guard) = create_file_writer(&config);
        drop(guard);
        assert!(dir.path().join("aido-test").exists());
    }
}
