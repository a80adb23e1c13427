//! Listener callbacks registered with the directory watcher

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique listener identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked with the absolute path of every matching new file
///
/// Clones share the callback and the identity, so registering a clone is
/// the same as registering the original.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Arc<dyn Fn(&Path) + Send + Sync>,
}

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        Self {
            id: ListenerId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub(crate) fn notify(&self, path: &Path) {
        (self.callback)(path)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}
