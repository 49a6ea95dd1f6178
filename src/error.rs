//! Error types for a3s-scheduler

use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by a job body
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced synchronously by scheduler operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start()` called while the tick loop is already running
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// `shutdown()` called while the scheduler is not running
    #[error("Scheduler is not running")]
    NotRunning,

    /// Degenerate trigger configuration (zero interval, empty weekday set, ...)
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Unknown IANA time zone name
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Job store backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// The job's trigger yields no run time at registration
    #[error("Job '{0}' has no future run time")]
    NoFutureRun(String),

    /// No Tokio runtime available to host the tick loop
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure of a single job execution
///
/// Never returned to the caller of a scheduler method; it only travels
/// inside error events delivered to listeners.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The job body returned an error
    #[error("Job failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// The job body panicked
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// The job task was aborted before it finished
    #[error("Job task was cancelled")]
    Cancelled,
}

impl JobError {
    /// Wrap an error returned by a job body
    pub fn failed(error: impl Into<BoxError>) -> Self {
        JobError::Failed(Arc::from(error.into()))
    }
}
