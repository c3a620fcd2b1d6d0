//! Atomic stats collector and the [`PoolStats`] snapshot it produces.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Lock-free counters updated from the worker completion path.
pub struct StatsCollector {
    created_at: Instant,
    completed: AtomicU64,
    failed: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    pub fn record(&self, succeeded: bool, duration_nanos: u64) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos.fetch_add(duration_nanos, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn average_duration_nanos(&self) -> f64 {
        let total_jobs = self.completed() + self.failed();
        if total_jobs == 0 {
            return 0.0;
        }
        self.total_duration_nanos.load(Ordering::Relaxed) as f64 / total_jobs as f64
    }

    /// Completed jobs per minute since construction.
    pub fn jobs_per_minute(&self) -> f64 {
        let elapsed_minutes = self.created_at.elapsed().as_secs_f64() / 60.0;
        if elapsed_minutes <= 0.0 {
            return 0.0;
        }
        self.completed() as f64 / elapsed_minutes
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Live snapshot of pool state.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total_workers: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub queue_depth: usize,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub average_job_duration_nanos: f64,
    pub jobs_per_minute: f64,
}

/// Atomic counter of workers currently executing a task, shared between
/// the pool and the autoscaler.
pub struct ActiveWorkers(AtomicUsize);

impl ActiveWorkers {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub fn enter(&self) -> ActiveGuard<'_> {
        self.0.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(self)
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for ActiveWorkers {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ActiveGuard<'a>(&'a ActiveWorkers);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::AcqRel);
    }
}
