//! `tracing` subscriber setup.
//!
//! Inside a host process the subscriber may already be owned by someone
//! else, so every initialiser uses `try_init` and keeps whatever is
//! installed. `RUST_LOG` always overrides the configured level.
//!
//! - [`init_production`]: daily-rotated JSON file plus stderr
//! - [`init_cli`]: stderr only

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// File name prefix; the appender adds a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_PREFIX: &str = "hostpatch.log";

/// Keeps the non-blocking file writer alive. Dropping it flushes pending entries.
pub struct LoggingGuard {
    logs_dir: PathBuf,
    _guard: WorkerGuard,
}

impl LoggingGuard {
    /// Directory the JSON log files are written to.
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("logs_dir", &self.logs_dir)
            .finish_non_exhaustive()
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// File logging when `logs_dir` is set, stderr only otherwise.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created.
pub fn init(level: &str, logs_dir: Option<&Path>) -> anyhow::Result<Option<LoggingGuard>> {
    match logs_dir {
        Some(dir) => init_production(dir, level).map(Some),
        None => {
            init_cli(level);
            Ok(None)
        }
    }
}

/// JSON records to `{logs_dir}/hostpatch.log.YYYY-MM-DD` plus human-readable stderr.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created.
pub fn init_production(logs_dir: &Path, level: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok();
    if !installed {
        tracing::debug!(dir = %logs_dir.display(), "subscriber already installed, file layer not attached");
    }

    Ok(LoggingGuard {
        logs_dir: logs_dir.to_path_buf(),
        _guard: guard,
    })
}

/// Stderr-only logging for the CLI subcommands.
pub fn init_cli(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}
