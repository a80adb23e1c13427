//! Wiring of the monitor and its poll loop
//!
//! The pool, writer and dispatcher are built here from the configuration and
//! shared downward as `Arc`s. The watcher is polled on a fixed delay: the
//! next poll is scheduled only once the previous one has returned.

use crate::config::Config;
use anyhow::{Context, Result};
use db::{Pool, SqliteManager, Writer};
use dropzone_core::relocate::restore_not_recorded;
use dropzone_core::{Dispatcher, RecordFormat, TaskContext};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use watcher::{DirectoryWatcher, Listener};

/// A running monitor over one watch directory
pub struct Monitor {
    watch_dir: PathBuf,
    interval: Duration,
    watcher: DirectoryWatcher,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<Pool<SqliteManager>>,
}

impl Monitor {
    /// Build every component and register the watch
    ///
    /// Files left in `not_recorded` by an earlier run are moved back into the
    /// watch directory after registration so the next poll retries them.
    pub fn start(config: &Config) -> Result<Self> {
        config.validate()?;

        let watch_dir = config
            .monitor
            .folder
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", config.monitor.folder.display()))?;

        let manager = SqliteManager::new(&config.database.url);
        let pool = Arc::new(Pool::new(manager, config.database.pool_config())?);
        let writer = Writer::new(Arc::clone(&pool), &config.database.table)?;

        let context = TaskContext {
            format: RecordFormat::default(),
            folders: config.monitor.outcome_folders(&watch_dir),
            sink: Arc::new(writer),
        };
        let workers = config.monitor.workers();
        let dispatcher = Arc::new(
            Dispatcher::new(workers, context).context("Failed to start worker threads")?,
        );

        let watcher = DirectoryWatcher::new()?;
        let listener = Listener::new(dispatcher.listener_fn());
        watcher.register(&watch_dir, &listener, &config.monitor.patterns())?;

        match restore_not_recorded(&watch_dir) {
            Ok(0) => {}
            Ok(n) => debug!("{} file(s) queued for retry", n),
            Err(e) => warn!("Restoring unrecorded files failed: {}", e),
        }

        info!(
            "Monitor started on {} ({} workers, polling every {:?})",
            watch_dir.display(),
            workers,
            config.monitor.poll_interval()
        );

        Ok(Self {
            watch_dir,
            interval: config.monitor.poll_interval(),
            watcher,
            dispatcher,
            pool,
        })
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Deliver pending file events once; returns the number of matches
    pub fn poll(&self) -> usize {
        self.watcher.poll()
    }

    /// Number of files queued or being processed
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Poll with a fixed delay until `shutdown` completes
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let matched = self.poll();
            if matched > 0 {
                debug!("Queued {} new file(s)", matched);
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Shutdown requested");
    }

    /// Stop watching, drain queued files and join the workers
    pub fn shutdown(self) {
        let Monitor {
            watch_dir,
            watcher,
            dispatcher,
            pool,
            ..
        } = self;

        // Dropping the watcher releases the listener's handle on the dispatcher
        watcher.unregister(&watch_dir);
        drop(watcher);

        match Arc::try_unwrap(dispatcher) {
            Ok(mut dispatcher) => dispatcher.shutdown(),
            Err(_) => warn!("Dispatcher still shared; workers stop when it is dropped"),
        }

        let status = pool.status();
        info!(
            "Monitor stopped ({} of {} database sessions open)",
            status.open, status.capacity
        );
    }
}
