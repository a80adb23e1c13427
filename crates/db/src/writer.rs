//! Record writer backed by the connection pool

use crate::pool::Pool;
use crate::sqlite::SqliteManager;
use dropzone_core::{Error, Record, RecordSink, Result};
use rusqlite::{params, ErrorCode};
use std::sync::Arc;
use tracing::{debug, error};

/// Inserts records into `<table>(content, creation_date)`
pub struct Writer {
    pool: Arc<Pool<SqliteManager>>,
    table: String,
    insert_sql: String,
}

impl Writer {
    /// Build a writer for `table`, which must be a plain SQL identifier
    pub fn new(pool: Arc<Pool<SqliteManager>>, table: &str) -> Result<Self> {
        if !is_identifier(table) {
            return Err(Error::Config(format!("invalid table name: {:?}", table)));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
            insert_sql: format!(
                "INSERT INTO {}(content, creation_date) VALUES (?1, ?2)",
                table
            ),
        })
    }

    pub fn pool(&self) -> &Arc<Pool<SqliteManager>> {
        &self.pool
    }

    /// Insert one record
    ///
    /// Failing to obtain a session is returned as a connection error.
    /// Statement failures are logged and reported as `Ok(false)`. The
    /// session goes back to the pool on every path.
    pub fn write_entry(&self, record: &Record) -> Result<bool> {
        let conn = self.pool.get()?;

        let result = conn
            .prepare_cached(&self.insert_sql)
            .and_then(|mut stmt| stmt.execute(params![record.content, record.creation_date]));

        match result {
            Ok(_) => {
                debug!("Entry was successfully written to {}", self.table);
                Ok(true)
            }
            Err(e) => {
                error!("Insert into {} failed: {}", self.table, e);
                if is_broken(&e) {
                    conn.discard();
                }
                Ok(false)
            }
        }
    }
}

impl RecordSink for Writer {
    fn write_entry(&self, record: &Record) -> Result<bool> {
        Writer::write_entry(self, record)
    }
}

/// Errors after which the session should not be reused
fn is_broken(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(
            ErrorCode::CannotOpen
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
        )
    )
}

/// True for a plain SQL identifier: a letter or `_`, then letters, digits or `_`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
