//! dropzone monitor library
//!
//! Configuration loading, logging setup and the wiring that connects the
//! watcher, dispatcher and database writer. The `dropzone` binary is a thin
//! shell over this crate.

pub mod app;
pub mod config;
pub mod logging;

// Re-exports
pub use app::Monitor;
pub use config::{Config, DatabaseConfig, LoggingConfig, MonitorConfig, TimeUnit};
