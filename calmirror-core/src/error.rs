//! Error types for the calmirror sync engine.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while mirroring the two calendars.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limited{}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Dispatch queue '{0}' is closed")]
    QueueClosed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Whether another attempt of the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_)
                | SyncError::RateLimited { .. }
                | SyncError::Io(_)
                | SyncError::QueueClosed(_)
        )
    }

    /// The target entity no longer exists on its side.
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {}ms)", d.as_millis()))
        .unwrap_or_default()
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
