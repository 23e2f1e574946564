//! Disposable MySQL and Redis containers for integration tests.

pub mod mysql;
pub mod redis;

use std::time::Duration;
use thiserror::Error;

/// Attempts made to reach a freshly started container before giving up.
const CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("container error: {0}")]
    Container(#[from] testcontainers::TestcontainersError),

    #[error("could not connect to {service} after {attempts} attempts: {reason}")]
    Connect {
        service: &'static str,
        attempts: u32,
        reason: String,
    },

    #[error("failed to apply schema: {0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, InfraError>;
