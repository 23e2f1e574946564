use crate::error::StorageError;
use crate::history::HistoryTable;
use crate::record::LinkRecord;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use jiff::Timestamp;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Durable storage for live link records.
#[async_trait]
pub trait LinkRepository: Send + Sync + 'static {
    /// Inserts a record whose `id` is already assigned.
    ///
    /// Returns `Err(StorageError::Conflict)` if the code or id already exists
    /// and `Err(StorageError::InvalidData)` if the record has no id.
    async fn insert(&self, record: &LinkRecord) -> Result<()>;

    /// Retrieves the live record for a code, expired or not.
    async fn find_by_code(&self, code: &ShortCode) -> Result<Option<LinkRecord>>;

    /// Increments the access count and sets the last access time.
    /// Returns `false` if the code is not in the live table.
    async fn record_access(&self, code: &ShortCode, at: Timestamp) -> Result<bool>;

    /// Releases the underlying connections.
    async fn close(&self) -> Result<()>;
}

/// Moves records from the live table into monthly history tables.
#[async_trait]
pub trait HistoryRepository: Send + Sync + 'static {
    /// Creates `table` with the live table's schema if it does not exist.
    /// Returns `true` if the table was created.
    async fn ensure_history_table(&self, table: &HistoryTable) -> Result<bool>;

    /// Moves up to `limit` records with `expires_at < now` into `table` in a
    /// single transaction and returns how many were moved.
    ///
    /// Either every selected record is moved or none is.
    async fn archive_expired(&self, table: &HistoryTable, now: Timestamp, limit: u32)
        -> Result<u64>;

    /// Moves the record with `id` into `table` in a single transaction.
    /// Returns `false` if no such live record exists.
    async fn move_to_history(&self, table: &HistoryTable, id: i64) -> Result<bool>;
}
