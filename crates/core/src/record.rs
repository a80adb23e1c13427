//! Parsed record staging and the persistence seam

use crate::error::Result;

/// Maximum number of characters accepted in a record's content
pub const MAX_CONTENT_LEN: usize = 1024;

/// A record staged between parsing and the database write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub content: String,
    pub creation_date: String,
}

impl Record {
    pub fn new(content: impl Into<String>, creation_date: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            creation_date: creation_date.into(),
        }
    }
}

/// Destination for parsed records
///
/// `Ok(false)` means the statement failed and was already logged;
/// `Err` is reserved for failing to obtain a database session.
pub trait RecordSink: Send + Sync {
    fn write_entry(&self, record: &Record) -> Result<bool>;
}
