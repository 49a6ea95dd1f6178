//! Job completion events
//!
//! Every finished job execution produces one [`JobEvent`]. Events are
//! delivered synchronously to registered [`JobEventListener`]s, in
//! registration order, and are also broadcast to channel subscribers.

use crate::error::JobError;
use crate::executor::panic_message;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Outcome of a job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The job body completed normally
    Success,
    /// The job body returned an error or panicked
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Success => write!(f, "success"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Record of one finished job execution
#[derive(Debug, Clone)]
pub struct JobEvent {
    /// Job identifier
    pub job_id: String,

    /// Execution outcome
    pub status: JobStatus,

    /// When the execution finished, in the scheduler's time zone
    pub timestamp: DateTime<Tz>,

    /// Failure details; present iff `status` is `Error`
    pub error: Option<JobError>,
}

impl JobEvent {
    /// Build a success event
    pub fn success(job_id: impl Into<String>, timestamp: DateTime<Tz>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Success,
            timestamp,
            error: None,
        }
    }

    /// Build an error event
    pub fn failure(job_id: impl Into<String>, timestamp: DateTime<Tz>, error: JobError) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Error,
            timestamp,
            error: Some(error),
        }
    }

    /// Check if the execution succeeded
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// Observer of job outcomes
///
/// Called on the task that ran the job, right after it finished.
/// Implementations should return quickly. A panicking listener is logged
/// and does not keep the event from other listeners.
pub trait JobEventListener: Send + Sync {
    /// A job execution completed normally
    fn on_job_complete(&self, event: &JobEvent);

    /// A job execution failed
    fn on_job_error(&self, event: &JobEvent);
}

/// Listener registry owned by one scheduler
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn JobEventListener>>>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl EventDispatcher {
    /// Create a dispatcher whose broadcast channel holds `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            event_tx,
        }
    }

    /// Append a listener
    pub fn add_listener(&self, listener: Arc<dyn JobEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Deliver an event to every listener, then to channel subscribers
    pub fn emit(&self, event: JobEvent) {
        // Snapshot so listeners may register further listeners.
        let listeners: Vec<Arc<dyn JobEventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in &listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| match event.status {
                JobStatus::Success => listener.on_job_complete(&event),
                JobStatus::Error => listener.on_job_error(&event),
            }));
            if let Err(payload) = delivered {
                tracing::error!(
                    job_id = %event.job_id,
                    panic = %panic_message(payload),
                    "Event listener panicked"
                );
            }
        }

        let _ = self.event_tx.send(event);
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
