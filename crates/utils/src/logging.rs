//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable holding the directory for rolling log files
pub const LOG_PATH_ENV_VAR: &str = "LOG_PATH";

const LOG_FILE_PREFIX: &str = "gpu-dra-plugin.log";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

fn rolling_appender(log_dir: &Path) -> Result<RollingFileAppender, std::io::Error> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(3)
        .build(log_dir)
        .map_err(std::io::Error::other)
}

/// initiate the global tracing subscriber
///
/// Logs always go to stderr. When `log_dir` is set they are also written to a
/// daily-rotated file in that directory; the returned guard must be kept alive
/// for the file writer to flush.
pub fn init<P: AsRef<Path>>(log_dir: Option<P>) -> Option<WorkerGuard> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let (file_layer, guard, file_error) = match log_dir {
        Some(dir) => match rolling_appender(dir.as_ref()) {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let file_layer = layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter());
                (Some(file_layer), Some(guard), None)
            }
            Err(e) => (None, None, Some(e)),
        },
        None => (None, None, None),
    };

    registry().with(stderr_layer).with(file_layer).init();

    if let Some(e) = file_error {
        tracing::warn!("Failed to create rolling log file, logging to stderr only: {e}");
    }

    guard
}
