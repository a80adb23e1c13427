//! Fan-out of matched files onto a fixed worker pool

use crate::format::RecordFormat;
use crate::processor::{FileTask, OutcomeFolders, TaskReport};
use crate::record::RecordSink;
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashSet;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Default worker count: one per core plus one
pub fn default_workers() -> usize {
    num_cpus::get() + 1
}

/// Everything a worker needs to run a task
pub struct TaskContext {
    pub format: RecordFormat,
    pub folders: OutcomeFolders,
    pub sink: Arc<dyn RecordSink>,
}

struct Shared {
    context: TaskContext,
    /// Paths queued or being processed
    in_flight: DashSet<PathBuf>,
    on_complete: Option<Box<dyn Fn(&TaskReport) + Send + Sync>>,
}

/// Submits one [`FileTask`] per matched file to a pool of worker threads
///
/// Submission never blocks. A path already queued or running is not queued
/// again, so each file is handled by exactly one task.
pub struct Dispatcher {
    tx: Option<Sender<PathBuf>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Start `workers` threads serving `context`
    pub fn new(workers: usize, context: TaskContext) -> io::Result<Self> {
        Self::build(workers, context, None)
    }

    /// Like [`Dispatcher::new`], calling `on_complete` after every task
    pub fn with_observer<F>(
        workers: usize,
        context: TaskContext,
        on_complete: F,
    ) -> io::Result<Self>
    where
        F: Fn(&TaskReport) + Send + Sync + 'static,
    {
        Self::build(workers, context, Some(Box::new(on_complete)))
    }

    fn build(
        workers: usize,
        context: TaskContext,
        on_complete: Option<Box<dyn Fn(&TaskReport) + Send + Sync>>,
    ) -> io::Result<Self> {
        let (tx, rx) = unbounded::<PathBuf>();
        let shared = Arc::new(Shared {
            context,
            in_flight: DashSet::new(),
            on_complete,
        });

        let workers = (0..workers.max(1))
            .map(|i| {
                let rx = rx.clone();
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("file-worker-{}", i))
                    .spawn(move || worker_loop(rx, shared))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            tx: Some(tx),
            workers,
            shared,
        })
    }

    /// Queue `path` for processing
    ///
    /// Returns false if the path is already in flight or the dispatcher
    /// is shutting down.
    pub fn on_match(&self, path: &Path) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        if !self.shared.in_flight.insert(path.to_path_buf()) {
            debug!("{} is already being processed", path.display());
            return false;
        }
        if tx.send(path.to_path_buf()).is_err() {
            self.shared.in_flight.remove(path);
            warn!("Worker pool closed, dropping {}", path.display());
            return false;
        }
        true
    }

    /// Callback suitable for registering with a directory watcher
    pub fn listener_fn(self: &Arc<Self>) -> impl Fn(&Path) + Send + Sync + 'static {
        let dispatcher = Arc::clone(self);
        move |path: &Path| {
            dispatcher.on_match(path);
        }
    }

    /// Number of paths queued or being processed
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// Stop accepting work, finish queued tasks and join the workers
    pub fn shutdown(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("File worker exited abnormally");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<PathBuf>, shared: Arc<Shared>) {
    for path in rx.iter() {
        let ctx = &shared.context;
        let task = FileTask::new(path.clone(), ctx.format, ctx.folders.clone());
        let result = catch_unwind(AssertUnwindSafe(|| task.run(ctx.sink.as_ref())));
        shared.in_flight.remove(&path);

        match result {
            Ok(report) => {
                if let Some(observer) = &shared.on_complete {
                    observer(&report);
                }
            }
            Err(_) => error!("Processing {} panicked", path.display()),
        }
    }
}
