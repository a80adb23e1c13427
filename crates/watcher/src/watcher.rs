//! Poll-driven directory watcher

use crate::listener::{Listener, ListenerId};
use crate::matcher::NameMatcher;
use crossbeam_channel::{unbounded, Receiver};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dropzone_core::{Error, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

struct Registration {
    listener: Listener,
    matcher: NameMatcher,
}

/// Listeners attached to one watched directory
#[derive(Default)]
struct WatchEntry {
    listeners: DashMap<ListenerId, Arc<Registration>>,
}

/// Watches directories for newly created files
///
/// The OS notification backend queues events in the background; nothing is
/// delivered until [`DirectoryWatcher::poll`] drains them. Registration and
/// polling may run concurrently from different threads.
pub struct DirectoryWatcher {
    backend: Mutex<RecommendedWatcher>,
    events: Receiver<notify::Result<Event>>,
    directories: DashMap<PathBuf, WatchEntry>,
}

impl DirectoryWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded();
        let handler = move |res: notify::Result<Event>| {
            // Receiver gone means the watcher is being dropped
            let _ = tx.send(res);
        };
        let backend = notify::recommended_watcher(handler)
            .map_err(|e| Error::Config(format!("cannot start file watcher: {}", e)))?;

        Ok(Self {
            backend: Mutex::new(backend),
            events: rx,
            directories: DashMap::new(),
        })
    }

    /// Notify `listener` of new files in `dir` whose names match `patterns`
    ///
    /// `dir` must be an existing directory and not a symbolic link. An empty
    /// pattern list matches every file. Registering a listener again on the
    /// same directory replaces its patterns.
    pub fn register<S: AsRef<str>>(
        &self,
        dir: &Path,
        listener: &Listener,
        patterns: &[S],
    ) -> Result<()> {
        let meta = fs::symlink_metadata(dir).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::Config(format!("{} does not exist", dir.display())),
            _ => Error::Config(format!("cannot access {}: {}", dir.display(), e)),
        })?;
        if meta.file_type().is_symlink() {
            return Err(Error::Config(format!(
                "{}: symbolic links are not supported",
                dir.display()
            )));
        }
        if !meta.is_dir() {
            return Err(Error::Config(format!("{} is not a directory", dir.display())));
        }

        let dir = dir
            .canonicalize()
            .map_err(|e| Error::Config(format!("cannot resolve {}: {}", dir.display(), e)))?;
        let matcher = NameMatcher::new(patterns)?;
        let shown = matcher.patterns().to_vec();

        let entry = match self.directories.entry(dir.clone()) {
            Entry::Occupied(o) => o.into_ref(),
            Entry::Vacant(v) => {
                self.backend
                    .lock()
                    .watch(&dir, RecursiveMode::NonRecursive)
                    .map_err(|e| {
                        Error::Config(format!("cannot watch {}: {}", dir.display(), e))
                    })?;
                v.insert(WatchEntry::default())
            }
        };
        entry.listeners.insert(
            listener.id(),
            Arc::new(Registration {
                listener: listener.clone(),
                matcher,
            }),
        );

        info!(
            "Watching files matching {:?} under {} for changes",
            shown,
            dir.display()
        );
        Ok(())
    }

    /// Stop watching `dir`; returns false if it was not registered
    pub fn unregister(&self, dir: &Path) -> bool {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        if self.directories.remove(&dir).is_none() {
            return false;
        }
        if let Err(e) = self.backend.lock().unwatch(&dir) {
            debug!("Unwatching {} failed: {}", dir.display(), e);
        }
        true
    }

    /// Directories currently registered
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.directories.iter().map(|e| e.key().clone()).collect()
    }

    /// Deliver every creation event queued since the last call
    ///
    /// Never waits for new events. Each matching listener is invoked once
    /// per event with the file's absolute path. Returns the number of
    /// listener invocations.
    pub fn poll(&self) -> usize {
        let mut drained = 0usize;
        let mut invocations = 0usize;
        let mut lost = Vec::new();

        for result in self.events.try_iter() {
            drained += 1;
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!("File watcher error: {}", e);
                    lost.extend(e.paths.into_iter().filter(|p| self.directories.contains_key(p)));
                    continue;
                }
            };
            if is_handle_loss(&event.kind) {
                lost.extend(
                    event
                        .paths
                        .iter()
                        .filter(|p| self.directories.contains_key(p.as_path()))
                        .cloned(),
                );
                continue;
            }
            if !is_creation(&event.kind) {
                continue;
            }
            for path in &event.paths {
                invocations += self.dispatch(path);
            }
        }

        if drained == 0 {
            trace!("No changes were registered");
            return 0;
        }
        self.rearm(lost);
        invocations
    }

    fn dispatch(&self, path: &Path) -> usize {
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return 0;
        };
        if path.is_dir() {
            return 0;
        }

        // Collect first so listeners run without holding map guards
        let matched: Vec<Arc<Registration>> = match self.directories.get(dir) {
            Some(entry) => entry
                .listeners
                .iter()
                .filter(|r| r.matcher.is_match(name))
                .map(|r| Arc::clone(r.value()))
                .collect(),
            None => {
                trace!("Ignoring event for unwatched {}", dir.display());
                return 0;
            }
        };

        for registration in &matched {
            registration.listener.notify(path);
        }
        matched.len()
    }

    /// Re-arm watches whose native handle was lost and drop those whose
    /// directory is gone
    fn rearm(&self, lost: Vec<PathBuf>) {
        let mut stale: Vec<PathBuf> = self
            .directories
            .iter()
            .filter(|e| !e.key().is_dir())
            .map(|e| e.key().clone())
            .collect();
        stale.extend(lost);
        stale.sort();
        stale.dedup();

        for dir in stale {
            let mut backend = self.backend.lock();
            // The old handle may already be gone; only the new watch matters
            let _ = backend.unwatch(&dir);
            if dir.is_dir() {
                match backend.watch(&dir, RecursiveMode::NonRecursive) {
                    Ok(()) => {
                        info!("{} was recreated, its watch was re-armed", dir.display());
                        continue;
                    }
                    Err(e) => debug!("Re-arming {} failed: {}", dir.display(), e),
                }
            }
            drop(backend);
            self.directories.remove(&dir);
            warn!("{} is no longer available, its watch was dropped", dir.display());
        }
    }
}

/// Events after which the native handle of a watched directory is dead
fn is_handle_loss(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::Any))
    )
}

fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any | CreateKind::Other)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}
