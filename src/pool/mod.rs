//! Bounded worker pool: submission, cancellation, completion waiting,
//! and a results stream, with an atomic stats collector.

pub mod job;
pub mod priority;
mod stats;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cancellation::CancellationToken;
use crate::config::PoolConfig;
use crate::error::{panic_message, RegSyncError, Result};
use crate::scaler::ThroughputTracker;

pub use job::{JobOutcome, JobResult, Priority, TaskFn, WorkerJob};
pub use stats::PoolStats;
use stats::{ActiveWorkers, StatsCollector};

/// Which phase of the pool's lifecycle state machine a caller is
/// currently observing. Exposed for diagnostics only; the authoritative
/// gate is the `stopped` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    Created,
    Running,
    Draining,
    Stopping,
    Stopped,
}

/// A consumer-side handle onto the pool's result stream.
#[derive(Clone)]
pub struct ResultStream {
    inner: Arc<AsyncMutex<mpsc::Receiver<JobResult>>>,
}

impl ResultStream {
    /// Receive the next result, or `None` once the pool has stopped and
    /// every in-flight result has been drained.
    pub async fn recv(&self) -> Option<JobResult> {
        self.inner.lock().await.recv().await
    }
}

/// A bounded pool of workers consuming a job queue.
pub struct WorkerPool {
    config: PoolConfig,
    job_tx: parking_lot::Mutex<Option<mpsc::Sender<WorkerJob>>>,
    job_rx: Arc<AsyncMutex<mpsc::Receiver<WorkerJob>>>,
    result_tx: parking_lot::Mutex<Option<mpsc::Sender<JobResult>>>,
    result_rx: Arc<AsyncMutex<mpsc::Receiver<JobResult>>>,
    pool_cancel: CancellationToken,
    stats: Arc<StatsCollector>,
    active: Arc<ActiveWorkers>,
    total_workers: Arc<AtomicUsize>,
    target_workers: Arc<AtomicUsize>,
    next_worker_id: AtomicUsize,
    queue_depth: Arc<AtomicUsize>,
    handles: AsyncMutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    shutdown_lock: AsyncMutex<()>,
    phase: parking_lot::Mutex<PoolPhase>,
    tracker: parking_lot::Mutex<Option<Arc<ThroughputTracker>>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let buffer = config.queue_buffer();
        let (job_tx, job_rx) = mpsc::channel(buffer);
        let (result_tx, result_rx) = mpsc::channel(buffer);
        Arc::new(Self {
            config,
            job_tx: parking_lot::Mutex::new(Some(job_tx)),
            job_rx: Arc::new(AsyncMutex::new(job_rx)),
            result_tx: parking_lot::Mutex::new(Some(result_tx)),
            result_rx: Arc::new(AsyncMutex::new(result_rx)),
            pool_cancel: CancellationToken::new(),
            stats: Arc::new(StatsCollector::new()),
            active: Arc::new(ActiveWorkers::new()),
            total_workers: Arc::new(AtomicUsize::new(0)),
            target_workers: Arc::new(AtomicUsize::new(0)),
            next_worker_id: AtomicUsize::new(0),
            queue_depth: Arc::new(AtomicUsize::new(0)),
            handles: AsyncMutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown_lock: AsyncMutex::new(()),
            phase: parking_lot::Mutex::new(PoolPhase::Created),
            tracker: parking_lot::Mutex::new(None),
        })
    }

    /// Attach a throughput tracker. Every completed job's bytes processed
    /// and execution duration are fed to it from the completion path.
    /// Optional: a pool with nothing attached simply reports nothing.
    pub fn set_throughput_tracker(&self, tracker: Arc<ThroughputTracker>) {
        *self.tracker.lock() = Some(tracker);
    }

    /// Spawn `config.workers` workers. Idempotent: calling `start` again
    /// after a prior successful start is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RegSyncError::PoolStopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        *self.phase.lock() = PoolPhase::Running;
        self.target_workers.store(self.config.workers, Ordering::Release);
        let mut handles = self.handles.lock().await;
        for _ in 0..self.config.workers {
            handles.push(self.spawn_worker());
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::AcqRel);
        self.total_workers.fetch_add(1, Ordering::AcqRel);
        let pool = Arc::clone(self);
        tokio::spawn(async move { pool.run_worker(worker_id).await })
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        loop {
            if worker_id >= self.target_workers.load(Ordering::Acquire) {
                debug!(worker_id, "worker exiting: scaled down below this worker's index");
                break;
            }

            let job = {
                let mut rx = self.job_rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.pool_cancel.cancelled() => None,
                    maybe = rx.recv() => maybe,
                }
            };

            let Some(job) = job else { break };
            self.queue_depth.fetch_sub(1, Ordering::AcqRel);
            self.execute_job(worker_id, job).await;
        }
        self.total_workers.fetch_sub(1, Ordering::AcqRel);
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, worker_id, priority = %job.priority))]
    async fn execute_job(&self, worker_id: usize, job: WorkerJob) {
        let queue_wait = job.submitted_at.elapsed();
        let task_token = job.cancel.child_token();
        let _active_guard = self.active.enter();

        let start = Instant::now();
        let outcome = if task_token.is_cancelled() {
            JobOutcome::failed(RegSyncError::Cancelled(
                task_token.reason().unwrap_or_else(|| "job cancelled before start".into()),
            ))
        } else {
            let caught = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe((job.task)(
                task_token,
            )))
            .await;
            match caught {
                Ok(outcome) => outcome,
                Err(payload) => JobOutcome::failed(RegSyncError::Panic(panic_message(payload))),
            }
        };
        let execution_duration = start.elapsed();

        let succeeded = outcome.error.is_none();
        self.stats.record(succeeded, execution_duration.as_nanos() as u64);
        if let Some(tracker) = self.tracker.lock().clone() {
            tracker.record_job(outcome.bytes_processed, execution_duration);
        }

        let result = JobResult {
            id: job.id.clone(),
            error: outcome.error.as_ref().map(|e| e.to_string()),
            execution_duration,
            queue_wait,
            bytes_processed: outcome.bytes_processed,
            worker_id,
        };
        self.publish_result(result).await;
    }

    async fn publish_result(&self, result: JobResult) {
        let Some(tx) = self.result_tx.lock().clone() else {
            debug!(job_id = %result.id, "dropping result: results stream already closed");
            return;
        };
        tokio::select! {
            biased;
            send = tx.send(result) => {
                if let Err(err) = send {
                    debug!(job_id = %err.0.id, "dropping result: pool cancelled");
                }
            }
            _ = self.pool_cancel.cancelled() => {
                debug!("dropping result: pool cancellation observed during publish");
            }
            _ = tokio::time::sleep(self.config.result_publish_timeout) => {
                warn!("dropping result: publication exceeded result_publish_timeout");
            }
        }
    }

    /// Enqueue a job whose task token is a fresh child of the pool's
    /// cancellation token.
    pub async fn submit(&self, id: impl Into<String>, task: TaskFn) -> Result<()> {
        self.submit_inner(id.into(), None, task, Priority::default()).await
    }

    /// Enqueue a job whose task token additionally observes cancellation
    /// of `cancel`, without affecting any other task in the pool.
    pub async fn submit_with_cancellation(
        &self,
        cancel: CancellationToken,
        id: impl Into<String>,
        task: TaskFn,
    ) -> Result<()> {
        self.submit_inner(id.into(), Some(cancel), task, Priority::default()).await
    }

    async fn submit_inner(
        &self,
        id: String,
        extra_cancel: Option<CancellationToken>,
        task: TaskFn,
        priority: Priority,
    ) -> Result<()> {
        if id.is_empty() {
            return Err(RegSyncError::InvalidInput("job id must not be empty".into()));
        }
        let sender = {
            let guard = self.job_tx.lock();
            guard.clone()
        };
        let Some(sender) = sender else {
            return Err(RegSyncError::PoolStopped);
        };

        let task_cancel = self.pool_cancel.child_token();
        if let Some(extra) = extra_cancel {
            let forward_target = task_cancel.clone();
            tokio::spawn(async move {
                extra.cancelled().await;
                forward_target.cancel("per-task cancellation");
            });
        }

        let job = WorkerJob::new(id.clone(), task_cancel, task).with_priority(priority);
        self.queue_depth.fetch_add(1, Ordering::AcqRel);

        let deadline = Instant::now() + self.config.submit_timeout;
        match tokio::time::timeout_at(deadline.into(), sender.send(job)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.queue_depth.fetch_sub(1, Ordering::AcqRel);
                Err(RegSyncError::PoolStopped)
            }
            Err(_) => {
                self.queue_depth.fetch_sub(1, Ordering::AcqRel);
                Err(RegSyncError::QueueFull {
                    job_id: id,
                    waited: self.config.submit_timeout,
                })
            }
        }
    }

    /// A consumer-side stream of completed [`JobResult`]s.
    pub fn results(&self) -> ResultStream {
        ResultStream {
            inner: Arc::clone(&self.result_rx),
        }
    }

    /// Live snapshot of pool state.
    pub fn stats(&self) -> PoolStats {
        let active = self.active.get();
        let total = self.total_workers.load(Ordering::Acquire);
        PoolStats {
            total_workers: total,
            active_workers: active,
            idle_workers: total.saturating_sub(active),
            queue_depth: self.queue_depth.load(Ordering::Acquire),
            running: active as u64,
            completed: self.stats.completed(),
            failed: self.stats.failed(),
            average_job_duration_nanos: self.stats.average_duration_nanos(),
            jobs_per_minute: self.stats.jobs_per_minute(),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Acquire)
    }

    pub fn current_workers(&self) -> usize {
        self.total_workers.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> PoolPhase {
        *self.phase.lock()
    }

    /// Set the target worker count. Scaling up spawns new workers
    /// immediately; scaling down relies on natural attrition: each worker
    /// notices the lowered target the next time it loops and exits.
    pub async fn scale_to(self: &Arc<Self>, target: usize) {
        let previous_target = self.target_workers.swap(target, Ordering::AcqRel);
        if target > previous_target {
            let current = self.total_workers.load(Ordering::Acquire);
            let to_spawn = target.saturating_sub(current);
            let mut handles = self.handles.lock().await;
            for _ in 0..to_spawn {
                handles.push(self.spawn_worker());
            }
        }
    }

    /// Drain the queue and block until all in-flight jobs finish, without
    /// cancelling any task's token.
    pub async fn wait(self: &Arc<Self>) {
        self.shutdown(false).await;
    }

    /// Cancel all workers, close the input, wait for termination, and
    /// close the results stream. Idempotent and safe to call concurrently
    /// with [`Self::wait`].
    pub async fn stop(self: &Arc<Self>) {
        self.shutdown(true).await;
    }

    async fn shutdown(self: &Arc<Self>, cancel_workers: bool) {
        let _serialize = self.shutdown_lock.lock().await;
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        *self.phase.lock() = if cancel_workers { PoolPhase::Stopping } else { PoolPhase::Draining };
        if cancel_workers {
            self.pool_cancel.cancel("worker pool stopped");
        }
        self.job_tx.lock().take();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            let _ = handle.await;
        }

        self.result_tx.lock().take();
        *self.phase.lock() = PoolPhase::Stopped;
        self.stopped.store(true, Ordering::Release);
    }
}
