//! Per-file processing: parse, validate, persist, relocate
//!
//! Every task ends in exactly one terminal outcome and moves its file to
//! exactly one folder:
//!
//! ```text
//! START -> PARSING -> MALFORMED                          => corrupted/
//!                  -> PARSED -> PERSISTING -> PERSISTED      => processed/
//!                                          -> PERSIST_FAILED => not_recorded/
//! ```

use crate::error::Error;
use crate::format::{RecordFormat, RecordHandler};
use crate::record::RecordSink;
use crate::relocate::{relocate, NOT_RECORDED_FOLDER};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Terminal state of a file task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Record written; file goes to the processed folder
    Persisted,
    /// Parse or validation failed; file goes to the corrupted folder
    Malformed,
    /// Record not written; file goes to `not_recorded`
    PersistFailed,
    /// The file disappeared before it could be read
    Vanished,
}

/// Where the outcome folders live
#[derive(Debug, Clone)]
pub struct OutcomeFolders {
    pub processed: PathBuf,
    pub corrupted: PathBuf,
}

impl OutcomeFolders {
    /// `processed/` and `corrupted/` directly under `watch_dir`
    pub fn under(watch_dir: &Path) -> Self {
        Self {
            processed: watch_dir.join(crate::relocate::PROCESSED_FOLDER),
            corrupted: watch_dir.join(crate::relocate::CORRUPTED_FOLDER),
        }
    }
}

/// A single matched file awaiting processing
#[derive(Debug, Clone)]
pub struct FileTask {
    pub path: PathBuf,
    pub format: RecordFormat,
    pub folders: OutcomeFolders,
}

/// Result of running a [`FileTask`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub outcome: Outcome,
    /// Final location of the file, if it was relocated
    pub destination: Option<PathBuf>,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>, format: RecordFormat, folders: OutcomeFolders) -> Self {
        Self {
            path: path.into(),
            format,
            folders,
        }
    }

    /// Run the task to its terminal state
    pub fn run(&self, sink: &dyn RecordSink) -> TaskReport {
        let outcome = self.process(sink);
        let target = match outcome {
            Outcome::Persisted => self.folders.processed.clone(),
            Outcome::Malformed => self.folders.corrupted.clone(),
            Outcome::PersistFailed => self.not_recorded_folder(),
            Outcome::Vanished => {
                return TaskReport {
                    outcome,
                    destination: None,
                }
            }
        };

        let destination = match relocate(&self.path, &target) {
            Ok(dest) => {
                debug!("Moved {} to {}", self.path.display(), dest.display());
                Some(dest)
            }
            Err(e) => {
                error!("Failed to move {} to {}: {}", self.path.display(), target.display(), e);
                None
            }
        };

        TaskReport {
            outcome,
            destination,
        }
    }

    fn process(&self, sink: &dyn RecordSink) -> Outcome {
        let handler = match self.format.parse_file(&self.path) {
            Ok(handler) => handler,
            Err(Error::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                warn!("File {} vanished before processing", self.path.display());
                return Outcome::Vanished;
            }
            Err(e) => {
                error!("File {} is malformed: {}", self.path.display(), e);
                return Outcome::Malformed;
            }
        };

        match handler.persist(sink) {
            Ok(true) => {
                info!(
                    "File {} was successfully parsed and recorded to database",
                    self.path.display()
                );
                Outcome::Persisted
            }
            Ok(false) => {
                error!("Record from {} was not written", self.path.display());
                Outcome::PersistFailed
            }
            Err(e) => {
                error!("Record from {} was not written: {}", self.path.display(), e);
                Outcome::PersistFailed
            }
        }
    }

    fn not_recorded_folder(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(NOT_RECORDED_FOLDER)
    }
}
