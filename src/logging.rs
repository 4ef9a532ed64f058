//! Diagnostics sink
//!
//! Installs a global `tracing` subscriber writing to stdout and to an
//! append-only log file. Selection decisions are logged under the
//! `pinokio_inspector::select` target, so `RUST_LOG=pinokio_inspector::select=debug`
//! isolates them.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Default log file name inside the temp directory
pub const LOG_FILE_NAME: &str = "pinokio-inspector.log";

/// Where diagnostics go
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log file path; `None` disables the file sink
    pub file: Option<PathBuf>,
    /// Also write human-readable output to stdout
    pub stdout: bool,
    /// Filter directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: Some(std::env::temp_dir().join(LOG_FILE_NAME)),
            stdout: true,
            filter: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// File sink only, e.g. when stdout carries machine-readable output
    pub fn file_only() -> Self {
        Self {
            stdout: false,
            ..Default::default()
        }
    }
}

fn split_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Logging(format!("Invalid log file path: {}", path.display())))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name.to_string()))
}

/// Non-blocking writer appending to `path`. Lines still queued are written
/// when the guard drops.
pub fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let (dir, name) = split_path(path)?;
    std::fs::create_dir_all(&dir)?;
    let appender = tracing_appender::rolling::never(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the program; dropping it
/// flushes and stops the file writer.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = config.stdout.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_writes_to_temp_dir() {
        let config = LogConfig::default();
        let file = config.file.unwrap();
        assert!(file.starts_with(std::env::temp_dir()));
        assert!(file.ends_with(LOG_FILE_NAME));
        assert!(config.stdout);
    }

    #[test]
    fn test_split_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("inspector.log");
        let (parent, name) = split_path(&path).unwrap();
        assert_eq!(parent, dir.path().join("logs"));
        assert_eq!(name, "inspector.log");

        let (parent, name) = split_path(Path::new("bare.log")).unwrap();
        assert_eq!(parent, PathBuf::from("."));
        assert_eq!(name, "bare.log");

        assert!(split_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_dropping_guard_flushes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("inspector.log");
        let (writer, guard) = file_writer(&path).unwrap();

        let subscriber = fmt().with_writer(writer).with_ansi(false).finish();
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("Unable to locate frame to inspect");
        });
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Unable to locate frame to inspect"));
    }
}
