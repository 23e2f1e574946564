use burrow_core::{CoreError, StorageError};
use thiserror::Error;

/// Failure of a single archival run. The run's transaction is rolled back.
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("invalid history table name: {0}")]
    InvalidTable(#[from] CoreError),
    #[error("failed to prepare history table '{table}': {source}")]
    HistoryTable {
        table: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to archive batch into '{table}': {source}")]
    Batch {
        table: String,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was cancelled: {0}")]
    Cancelled(String),
}

/// A task whose schedule could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSchedule {
    pub task: String,
    pub expression: String,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("{} task(s) have an invalid schedule", .0.len())]
    InvalidSchedule(Vec<InvalidSchedule>),
    #[error("scheduler already started")]
    AlreadyStarted,
}
