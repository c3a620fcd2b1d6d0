//! [`WorkerJob`] and [`JobResult`]: the unit of work submitted to the
//! pool and the one-shot value produced per completion.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use crate::cancellation::CancellationToken;
use crate::error::RegSyncError;

/// Outcome a task reports back to the pool: success-or-error plus the
/// number of bytes the task itself transferred, since the pool has no
/// way to measure that from outside the task body.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub error: Option<RegSyncError>,
    pub bytes_processed: u64,
}

impl JobOutcome {
    pub fn ok(bytes_processed: u64) -> Self {
        Self {
            error: None,
            bytes_processed,
        }
    }

    pub fn failed(error: RegSyncError) -> Self {
        Self {
            error: Some(error),
            bytes_processed: 0,
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A task body: given its (possibly derived) cancellation token, runs to
/// completion and reports a [`JobOutcome`].
pub type TaskFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, JobOutcome> + Send>;

/// Priority is preserved for observability only; the pool never reorders
/// the queue on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A unit of work submitted to the pool.
pub struct WorkerJob {
    pub id: String,
    pub priority: Priority,
    pub task: TaskFn,
    pub cancel: CancellationToken,
    pub submitted_at: Instant,
    pub estimated_bytes: Option<u64>,
    pub estimated_duration: Option<Duration>,
}

impl WorkerJob {
    pub fn new(id: impl Into<String>, cancel: CancellationToken, task: TaskFn) -> Self {
        Self {
            id: id.into(),
            priority: Priority::default(),
            task,
            cancel,
            submitted_at: Instant::now(),
            estimated_bytes: None,
            estimated_duration: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimate(mut self, bytes: Option<u64>, duration: Option<Duration>) -> Self {
        self.estimated_bytes = bytes;
        self.estimated_duration = duration;
        self
    }
}

/// One-shot result produced per completed [`WorkerJob`].
#[derive(Debug, Clone)]
pub struct JobResult {
    pub id: String,
    pub error: Option<String>,
    pub execution_duration: Duration,
    pub queue_wait: Duration,
    pub bytes_processed: u64,
    pub worker_id: usize,
}
