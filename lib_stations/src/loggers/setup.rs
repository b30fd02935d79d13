use std::path::PathBuf;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global subscriber is already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is not set, e.g. `"info"`.
    pub level: String,
    /// Directory for the daily rolling JSON log; console only when `None`.
    pub dir: Option<PathBuf>,
    /// Log file name prefix, usually the binary name.
    pub file_prefix: String,
}

/// # Setup Logging
///
/// Installs the global `tracing` subscriber:
/// - the filter comes from `RUST_LOG`, falling back to `settings.level`;
/// - a human-readable console layer with targets and ANSI colors;
/// - when `settings.dir` is set, a JSON layer on a daily rolling, non-blocking file.
///
/// The returned guard flushes the file writer when dropped, so keep it alive for the
/// lifetime of the process.
pub fn setup_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level).map_err(|source| LoggingError::Filter {
            filter: settings.level.clone(),
            source,
        })?,
    };

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            let file_appender = rolling::daily(dir, &settings.file_prefix);
            let (writer, guard) = non_blocking(file_appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        level = %settings.level,
        dir = ?settings.dir,
        "Logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_the_log_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("logs");
        let settings = LogSettings {
            level: "info".to_string(),
            dir: Some(dir.clone()),
            file_prefix: "server_stations".to_string(),
        };

        // Another test may already own the global subscriber; the directory is created
        // before installation is attempted either way.
        let _ = setup_logging(&settings);
        assert!(dir.is_dir());
    }
}
