//! Log sinks for a run: stderr always, plus a rolling file when configured.

use std::path::Path;

use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use trainee_config::LoggingConfig;

/// Rotated log files kept on disk.
const RETAINED_LOG_FILES: usize = 7;

/// Install the global subscriber.  `RUST_LOG` overrides the configured
/// level.  A subscriber that is already installed is left alone.
///
/// The returned guard flushes the file sink when dropped and must be kept
/// alive for the duration of the run.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut file_failure = None;
    let mut guard = None;
    let file_layer = if config.file.is_empty() {
        None
    } else {
        match rolling_writer(Path::new(&config.file)) {
            Ok((writer, g)) => {
                guard = Some(g);
                Some(fmt::layer().with_writer(writer).with_ansi(false))
            }
            Err(e) => {
                file_failure = Some(e);
                None
            }
        }
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    if let Some(e) = file_failure {
        error!(path = %config.file, error = %e, "failed to configure file logger");
    }
    guard
}

fn rolling_writer(path: &Path) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let prefix = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("trainee");
    let suffix = path.extension().and_then(|s| s.to_str()).unwrap_or("log");

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix(suffix)
        .max_log_files(RETAINED_LOG_FILES)
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rolling_writer_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outputs").join("day_1.log");
        let (_writer, _guard) = rolling_writer(&path).unwrap();
        assert!(dir.path().join("outputs").is_dir());
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LoggingConfig::default();
        let _ = init(&config);
        assert!(init(&config).is_none());
    }
}
