//! Priority-ordered submission adapter over [`WorkerPool`]. Additive:
//! the base pool's queue remains FIFO, and this wraps submission with an
//! in-memory heap that releases higher-priority jobs to the pool first.
//! Nothing in `reconcile` or `schedule` depends on it; it exists for
//! callers that want priority ordering without the pool itself
//! reordering its channel.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::cancellation::CancellationToken;

use super::{Priority, TaskFn, WorkerPool};

struct PrioritizedJob {
    priority: Priority,
    sequence: u64,
    id: String,
    cancel: Option<CancellationToken>,
    task: TaskFn,
}

impl PartialEq for PrioritizedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for PrioritizedJob {}

impl PartialOrd for PrioritizedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first; within a priority, earlier sequence
        // (lower number) first, so ties stay FIFO.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Wraps a [`WorkerPool`] with a priority heap: callers enqueue here
/// instead of calling `submit` directly, and a drain task feeds the pool
/// in priority order.
pub struct PriorityPoolHandle {
    pool: Arc<WorkerPool>,
    heap: Arc<parking_lot::Mutex<BinaryHeap<PrioritizedJob>>>,
    notify: Arc<tokio::sync::Notify>,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl PriorityPoolHandle {
    pub fn new(pool: Arc<WorkerPool>) -> Arc<Self> {
        let handle = Arc::new(Self {
            pool,
            heap: Arc::new(parking_lot::Mutex::new(BinaryHeap::new())),
            notify: Arc::new(tokio::sync::Notify::new()),
            next_sequence: std::sync::atomic::AtomicU64::new(0),
        });
        handle.clone().spawn_drain_loop();
        handle
    }

    fn spawn_drain_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let next = self.heap.lock().pop();
                let Some(job) = next else {
                    self.notify.notified().await;
                    continue;
                };
                let submission = match job.cancel {
                    Some(cancel) => self.pool.submit_with_cancellation(cancel, job.id, job.task).await,
                    None => self.pool.submit(job.id, job.task).await,
                };
                if submission.is_err() {
                    break;
                }
            }
        });
    }

    /// Enqueue a job at `priority`. Returns immediately; the job reaches
    /// the underlying pool once every currently-queued higher-or-equal
    /// priority job has been released to it.
    pub fn submit_with_priority(&self, priority: Priority, id: impl Into<String>, task: TaskFn) {
        self.enqueue(priority, id.into(), None, task);
    }

    pub fn submit_with_priority_and_cancellation(
        &self,
        priority: Priority,
        cancel: CancellationToken,
        id: impl Into<String>,
        task: TaskFn,
    ) {
        self.enqueue(priority, id.into(), Some(cancel), task);
    }

    fn enqueue(&self, priority: Priority, id: String, cancel: Option<CancellationToken>, task: TaskFn) {
        let sequence = self.next_sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.heap.lock().push(PrioritizedJob {
            priority,
            sequence,
            id,
            cancel,
            task,
        });
        self.notify.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::JobOutcome;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn record_order_job(order: Arc<StdMutex<Vec<String>>>, id: &str) -> TaskFn {
        let id = id.to_string();
        Box::new(move |_cancel| {
            Box::pin(async move {
                order.lock().unwrap().push(id);
                JobOutcome::ok(0)
            })
        })
    }

    #[tokio::test]
    async fn higher_priority_jobs_drain_first() {
        let pool = WorkerPool::new(PoolConfig {
            workers: 1,
            ..Default::default()
        });
        pool.start().await.unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let handle = PriorityPoolHandle::new(Arc::clone(&pool));

        // Hold the single worker busy so both submissions land in the
        // heap before the drain loop starts pulling from it.
        let busy: TaskFn = Box::new(|_cancel| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                JobOutcome::ok(0)
            })
        });
        handle.submit_with_priority(Priority::Low, "busy", busy);
        tokio::time::sleep(Duration::from_millis(5)).await;

        handle.submit_with_priority(Priority::Low, "low", record_order_job(Arc::clone(&order), "low"));
        handle.submit_with_priority(Priority::Critical, "high", record_order_job(Arc::clone(&order), "high"));

        for _ in 0..3 {
            pool.results().recv().await.unwrap();
        }
        let seen = order.lock().unwrap().clone();
        assert_eq!(seen, vec!["high".to_string(), "low".to_string()]);
        pool.stop().await;
    }
}
