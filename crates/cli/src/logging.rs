//! Tracing subscriber setup
//!
//! Console output always goes to stderr. With a log directory configured,
//! a daily rolling file receives the same events without ANSI colours.
//! `RUST_LOG` overrides the default `info` filter.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_PREFIX: &str = "dropzone.log";

/// Install the global subscriber
///
/// The returned guard flushes the file writer when dropped and must be held
/// for the life of the process.
pub fn init(directory: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let Some(directory) = directory else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()
            .context("Failed to install log subscriber")?;
        return Ok(None);
    };

    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(rolling::daily(directory, LOG_FILE_PREFIX));
    let file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install log subscriber")?;

    tracing::info!("Logging to {}", directory.display());
    Ok(Some(guard))
}
