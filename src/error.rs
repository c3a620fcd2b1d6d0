//! Error taxonomy for the replication concurrency core.

use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, RegSyncError>;

/// Closed taxonomy of failures the core itself can produce.
///
/// External collaborators (registry clients, the copier, metrics sinks)
/// report their own opaque errors, which call sites wrap into
/// [`RegSyncError::Transient`] rather than threading a foreign error type
/// through the core.
#[derive(Error, Debug)]
pub enum RegSyncError {
    /// Missing required fields, malformed cron expression, empty rule set.
    /// Surfaced to the caller immediately; no state change occurs.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced repository, registry client, or job was not found.
    /// Logged and counted; the caller's broader operation continues.
    #[error("not found: {0}")]
    NotFound(String),

    /// A wrapped failure from a sub-operation (manifest fetch, copy, task
    /// execution). Carries enough context to log without reformatting.
    #[error("transient failure in {context}: {source}")]
    Transient {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// Cooperative cancellation was observed. Always propagated unwrapped
    /// and never retried.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The worker pool has been stopped and can no longer accept work.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// A submission could not be enqueued within its back-pressure
    /// deadline.
    #[error("queue full: job {job_id} not accepted within {waited:?}")]
    QueueFull { job_id: String, waited: Duration },

    /// A caller-supplied deadline elapsed before the operation completed.
    /// Distinct from [`RegSyncError::QueueFull`], which is specifically a
    /// pool-submission back-pressure failure; this variant covers other
    /// deadline-bound waits such as rate limiter acquisition.
    #[error("deadline exceeded after waiting {waited:?}")]
    DeadlineExceeded { waited: Duration },

    /// A task panicked; the panic payload has been converted to a message.
    /// Ownership flags (e.g. a job's `running` flag) are always cleared
    /// before this error is returned.
    #[error("task panicked: {0}")]
    Panic(String),
}

impl RegSyncError {
    /// Wrap an external collaborator's error as a transient failure.
    pub fn transient(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        RegSyncError::Transient {
            context: context.into(),
            source: source.into(),
        }
    }

    /// True if this error represents cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RegSyncError::Cancelled(_))
    }
}

/// Convert a caught panic payload into a human-readable message.
///
/// Used by both the scheduler's task barrier and the worker pool's task
/// wrapper so panics are reported identically wherever they are caught.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
