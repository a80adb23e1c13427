//! File system watching for dropzone
//!
//! This crate provides a poll-driven watcher over the platform notification
//! backend (`notify`):
//! - One native watch per registered directory, shared by its listeners
//! - Per-listener filename globs (no patterns = match everything)
//! - Non-blocking drain of queued creation events on each poll

pub mod listener;
pub mod matcher;
pub mod watcher;

// Re-exports
pub use listener::{Listener, ListenerId};
pub use matcher::NameMatcher;
pub use watcher::DirectoryWatcher;
