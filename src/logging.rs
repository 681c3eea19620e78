//! Console and file logging. Library code logs through the `log` facade; records are bridged
//! into the tracing subscriber installed here.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "latest.log";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Keeps the file writer flushing until dropped
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    /// Log file, when one was opened
    pub path: Option<PathBuf>,
}

/// Log to stderr, and to `<root>/logs/latest.log` when a root is given
pub fn init(root: Option<&Path>, debug: bool) -> Result<LogGuard, LogError> {
    let console_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_writer(io::stderr)
        .with_filter(console_level);

    let (file_layer, guard, path) = match root {
        Some(root) => {
            let logs_dir = root.join(LOG_DIR);
            std::fs::create_dir_all(&logs_dir)?;

            let file_appender = rolling::never(&logs_dir, LOG_FILE);
            let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
                .lossy(false)
                .finish(file_appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard), Some(logs_dir.join(LOG_FILE)))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogGuard { _file: guard, path })
}
