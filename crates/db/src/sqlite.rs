//! SQLite sessions for the connection pool

use crate::pool::ManageConnection;
use dropzone_core::{Error, Result};
use rusqlite::Connection;
use std::time::Duration;
use tracing::trace;

/// How long a session waits on a locked database before failing a statement
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens SQLite sessions for a database URL
///
/// Accepts a plain path, `sqlite://path`, `sqlite:path` or `:memory:`.
/// Every `:memory:` session is a separate empty database.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
}

impl SqliteManager {
    pub fn new(url: &str) -> Self {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        Self {
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

impl ManageConnection for SqliteManager {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection> {
        let conn = if self.is_memory() {
            Connection::open_in_memory()
        } else {
            Connection::open(&self.path)
        }
        .map_err(|e| Error::connection(format!("cannot open database {}", self.path), e))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::connection("cannot configure busy timeout", e))?;

        // WAL lets concurrent sessions write without blocking readers
        if !self.is_memory() {
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|e| Error::connection("cannot enable WAL journal", e))?;
        }

        trace!("Connection to {} created", self.path);
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_url_prefixes() {
        assert_eq!(SqliteManager::new("sqlite:///tmp/a.db").path(), "/tmp/a.db");
        assert_eq!(SqliteManager::new("sqlite:b.db").path(), "b.db");
        assert_eq!(SqliteManager::new("c.db").path(), "c.db");
    }

    #[test]
    fn test_connect_file_database() {
        let temp = TempDir::new().unwrap();
        let manager = SqliteManager::new(temp.path().join("x.db").to_str().unwrap());
        let conn = manager.connect().unwrap();
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
    }

    #[test]
    fn test_connect_failure_is_connection_error() {
        let temp = TempDir::new().unwrap();
        let manager = SqliteManager::new(temp.path().join("missing/dir/x.db").to_str().unwrap());
        assert!(matches!(manager.connect(), Err(Error::Connection { .. })));
    }
}
