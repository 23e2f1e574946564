use thiserror::Error;

/// Errors reported by a [`CounterStore`](crate::CounterStore) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter operation timed out: {0}")]
    Timeout(String),
    #[error("counter operation failed: {0}")]
    Operation(String),
}

/// Errors returned by allocator construction and ID allocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid lease step {step}; expected a positive integer")]
    InvalidStep { step: i64 },
    #[error("invalid retry budget; at least one counter attempt is required")]
    InvalidRetries,
    #[error("counter store failed after {attempts} attempts for key '{key}': {source}")]
    Exhausted {
        key: String,
        attempts: u32,
        #[source]
        source: CounterError,
    },
    #[error("counter '{key}' returned {value}, which is below the lease step {step}")]
    CounterRegressed { key: String, value: i64, step: i64 },
}
