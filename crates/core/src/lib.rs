//! Core of dropzone
//!
//! This crate provides:
//! - The error taxonomy shared by every crate
//! - Record formats and the streaming XML driver
//! - The per-file outcome state machine
//! - Collision-safe relocation into outcome folders
//! - The dispatcher fanning matched files out to worker threads

pub mod dispatch;
pub mod error;
pub mod format;
pub mod processor;
pub mod record;
pub mod relocate;

// Re-exports
pub use dispatch::{default_workers, Dispatcher, TaskContext};
pub use error::{Error, Result};
pub use format::{RecordFormat, RecordHandler};
pub use processor::{FileTask, Outcome, OutcomeFolders, TaskReport};
pub use record::{Record, RecordSink, MAX_CONTENT_LEN};
