//! Database access for dropzone
//!
//! This crate provides:
//! - A bounded connection pool that fills on demand and clears when idle
//! - SQLite sessions for the pool (rusqlite)
//! - The record writer used by file tasks

pub mod pool;
pub mod sqlite;
pub mod writer;

// Re-exports
pub use pool::{ManageConnection, Pool, PoolConfig, PoolStatus, PooledConnection, DEFAULT_IDLE_TIMEOUT};
pub use sqlite::SqliteManager;
pub use writer::{is_identifier, Writer};
