//! Throughput tracking and the auto-scaler control loop: a sliding
//! window of samples feeding a cooldown-gated up/down decision.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::{AutoScalerConfig, ThroughputTrackerConfig};
use crate::pool::WorkerPool;

/// A single timestamped throughput sample.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputMeasurement {
    pub at: Instant,
    pub bytes_per_sec: f64,
    pub jobs_per_sec: f64,
    pub active_workers: usize,
    pub queue_depth: usize,
}

struct Counters {
    bytes: AtomicU64,
    jobs: AtomicU64,
}

/// Lock-free job recording plus a periodic sampler that turns counter
/// deltas into a bounded sliding window of [`ThroughputMeasurement`]s.
pub struct ThroughputTracker {
    config: ThroughputTrackerConfig,
    counters: Arc<Counters>,
    window: Arc<Mutex<VecDeque<ThroughputMeasurement>>>,
}

impl ThroughputTracker {
    pub fn new(config: ThroughputTrackerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            counters: Arc::new(Counters {
                bytes: AtomicU64::new(0),
                jobs: AtomicU64::new(0),
            }),
            window: Arc::new(Mutex::new(VecDeque::with_capacity(64))),
        })
    }

    /// Called from the worker completion path; deliberately lock-free.
    pub fn record_job(&self, bytes: u64, _duration: Duration) {
        self.counters.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.counters.jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recent sample's bytes/s, or zero before the first sample.
    pub fn current(&self) -> f64 {
        self.window.lock().back().map(|m| m.bytes_per_sec).unwrap_or(0.0)
    }

    pub fn samples(&self) -> Vec<ThroughputMeasurement> {
        self.window.lock().iter().copied().collect()
    }

    /// Spawn the background sampler. The returned task runs until
    /// `cancel` fires.
    pub fn spawn_sampler(
        self: &Arc<Self>,
        pool: Arc<WorkerPool>,
        cancel: crate::cancellation::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut last_bytes = 0u64;
            let mut last_jobs = 0u64;
            let interval = tracker.config.sample_interval;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let bytes_now = tracker.counters.bytes.load(Ordering::Relaxed);
                let jobs_now = tracker.counters.jobs.load(Ordering::Relaxed);
                let secs = interval.as_secs_f64().max(f64::EPSILON);
                let sample = ThroughputMeasurement {
                    at: Instant::now(),
                    bytes_per_sec: (bytes_now.saturating_sub(last_bytes)) as f64 / secs,
                    jobs_per_sec: (jobs_now.saturating_sub(last_jobs)) as f64 / secs,
                    active_workers: pool.stats().active_workers,
                    queue_depth: pool.queue_depth(),
                };
                last_bytes = bytes_now;
                last_jobs = jobs_now;

                let mut window = tracker.window.lock();
                window.push_back(sample);
                while window.len() > tracker.config.window_len {
                    window.pop_front();
                }
            }
        })
    }
}

/// Drives pool worker-count decisions from queue depth and measured
/// throughput against a configured target.
pub struct AutoScaler {
    config: AutoScalerConfig,
    last_adjustment: Mutex<Option<Instant>>,
}

impl AutoScaler {
    pub fn new(config: AutoScalerConfig) -> Self {
        Self {
            config,
            last_adjustment: Mutex::new(None),
        }
    }

    /// Spawn the control loop. Runs until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        pool: Arc<WorkerPool>,
        tracker: Arc<ThroughputTracker>,
        cancel: crate::cancellation::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.check_interval) => {}
                }
                self.tick(&pool, &tracker);
            }
        })
    }

    /// One control-loop iteration: read state, decide, apply. Exposed
    /// directly so tests can drive it without waiting on real time.
    pub fn tick(&self, pool: &Arc<WorkerPool>, tracker: &ThroughputTracker) {
        let current_workers = pool.current_workers();
        let queue_depth = pool.queue_depth();
        let current_throughput = tracker.current();
        let target = self.config.target_bytes_per_sec;

        if let Some(step) = self.decide_scale_up(current_workers, queue_depth, current_throughput, target) {
            self.apply(pool, current_workers, step as i64);
            return;
        }
        if let Some(step) = self.decide_scale_down(pool, current_workers, queue_depth, current_throughput, target) {
            self.apply(pool, current_workers, -(step as i64));
        }
    }

    fn decide_scale_up(&self, current: usize, queue_depth: usize, throughput: f64, target: f64) -> Option<usize> {
        let saturated = queue_depth > 2 * current;
        let under_delivering = throughput < 0.8 * target && current < self.config.max_workers;
        if !saturated && !under_delivering {
            return None;
        }
        Some((current / 4).max(1))
    }

    fn decide_scale_down(
        &self,
        pool: &Arc<WorkerPool>,
        current: usize,
        queue_depth: usize,
        throughput: f64,
        target: f64,
    ) -> Option<usize> {
        let drained = queue_depth == 0 && current > self.config.min_workers;
        let over_delivering = throughput > 1.2 * target && current > self.config.min_workers;
        if !drained && !over_delivering {
            return None;
        }
        let idle = pool.stats().idle_workers;
        if idle == 0 {
            return None;
        }
        Some((idle / 4).max(1))
    }

    fn apply(&self, pool: &Arc<WorkerPool>, current: usize, signed_step: i64) {
        let mut last = self.last_adjustment.lock();
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.config.adjustment_cooldown {
                debug!("skipping scale adjustment: cooldown not yet elapsed");
                return;
            }
        }
        *last = Some(now);
        drop(last);

        let target = if signed_step >= 0 {
            (current + signed_step as usize).min(self.config.max_workers)
        } else {
            current.saturating_sub((-signed_step) as usize).max(self.config.min_workers)
        };
        if target == current {
            return;
        }
        info!(from = current, to = target, "adjusting worker pool size");
        let pool = Arc::clone(pool);
        tokio::spawn(async move {
            pool.scale_to(target).await;
        });
    }
}
