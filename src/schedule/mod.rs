//! Cron-driven job scheduling: a job map guarded by a single read-write
//! lock, a ticker, and re-entrancy prevention via a per-job `running`
//! flag.

pub mod cron;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::cancellation::CancellationToken;
use crate::config::SchedulerConfig;
use crate::error::{panic_message, RegSyncError, Result};
use crate::external::{RegistryClient, ReplicationService};
use crate::pool::{JobOutcome, TaskFn, WorkerPool};
use crate::rule::ReplicationRule;

use cron::ParsedSchedule;

/// A scheduled replication rule. Mutated only by the scheduler under the
/// job map's lock.
struct Job {
    rule: ReplicationRule,
    schedule: ParsedSchedule,
    next_run: DateTime<Utc>,
    running: bool,
}

/// Constructed with a worker pool reference, a map of registry providers
/// keyed by registry id, an external replication-service dependency, and
/// a cancellation token bounding its lifetime. Every fired job is
/// dispatched through the pool rather than a bare spawned task, so
/// scheduled work shares the same concurrency bound, queue-depth
/// accounting, and auto-scaler visibility as every other pool consumer.
pub struct Scheduler {
    jobs: RwLock<HashMap<String, Job>>,
    pool: Arc<WorkerPool>,
    registries: HashMap<String, Arc<dyn RegistryClient>>,
    replication_service: Arc<dyn ReplicationService>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    immediate_check: tokio::sync::Notify,
}

impl Scheduler {
    pub fn new(
        pool: Arc<WorkerPool>,
        registries: HashMap<String, Arc<dyn RegistryClient>>,
        replication_service: Arc<dyn ReplicationService>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            pool,
            registries,
            replication_service,
            config,
            cancel: CancellationToken::new(),
            immediate_check: tokio::sync::Notify::new(),
        })
    }

    /// Registry providers this scheduler was constructed with, keyed by
    /// registry id.
    pub fn registries(&self) -> &HashMap<String, Arc<dyn RegistryClient>> {
        &self.registries
    }

    /// Validate and register a rule. Rejects an empty schedule with a
    /// silent skip (no error, no state change) rather than treating it as
    /// invalid input, since "never scheduled" is a legitimate rule state
    /// (on-demand reconciliation only, per [`ReplicationRule::schedule`]).
    pub async fn add_job(&self, rule: ReplicationRule) -> Result<()> {
        rule.validate_identity().map_err(RegSyncError::InvalidInput)?;
        let Some(expr) = rule.schedule.as_deref() else {
            debug!(key = %rule.rule_key(), "rule has no schedule; skipping registration");
            return Ok(());
        };

        let schedule = ParsedSchedule::parse(expr)?;
        let now = Utc::now();
        let next_run = schedule
            .next_after(now)
            .ok_or_else(|| RegSyncError::InvalidInput(format!("schedule '{expr}' never fires")))?;
        let fires_immediately = schedule.is_one_shot();

        let key = rule.rule_key();
        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&key) {
                info!(key = %key, "replacing existing scheduled job");
            }
            jobs.insert(
                key,
                Job {
                    rule,
                    schedule,
                    next_run,
                    running: false,
                },
            );
        }

        if fires_immediately {
            let notify = &self.immediate_check;
            let delay = self.config.immediate_check_delay;
            // Scheduling the wake-up on a short delay rather than firing
            // check_jobs inline keeps AddJob from ever blocking on pool
            // submission while holding no lock (the insert above already
            // released it).
            tokio::time::sleep(delay).await;
            notify.notify_one();
        }
        Ok(())
    }

    /// Remove a job by identity. Not-found is an error.
    pub async fn remove_job(&self, rule: &ReplicationRule) -> Result<()> {
        rule.validate_identity().map_err(RegSyncError::InvalidInput)?;
        let key = rule.rule_key();
        let mut jobs = self.jobs.write().await;
        jobs.remove(&key).ok_or_else(|| RegSyncError::NotFound(key))?;
        Ok(())
    }

    /// Cancel the scheduler. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel("scheduler stopped");
    }

    /// Run the ticker loop until stopped. Wakes every `tick_interval` or
    /// immediately after an `@now`/`@once` registration.
    pub async fn run(self: &Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("scheduler stopped; rejecting subsequent checks");
                    break;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = self.immediate_check.notified() => {}
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.check_jobs().await;
        }
    }

    async fn check_jobs(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<(String, ReplicationRule)> = {
            let mut jobs = self.jobs.write().await;
            let mut due = Vec::new();
            for (key, job) in jobs.iter_mut() {
                if job.running || now < job.next_run {
                    continue;
                }
                job.running = true;
                if !job.schedule.is_one_shot() {
                    if let Some(next) = job.schedule.next_after(now) {
                        job.next_run = next;
                    }
                }
                due.push((key.clone(), job.rule.clone()));
            }
            due
        };

        for (key, rule) in due {
            self.spawn_task(key, rule);
        }
    }

    /// Submit the fired job's task body to the worker pool rather than
    /// spawning it directly, so scheduled work shares the pool's
    /// concurrency bound and is visible to its queue-depth/stats
    /// accounting. Submission itself runs on its own spawned task since
    /// `submit` can block on back-pressure.
    fn spawn_task(self: &Arc<Self>, key: String, rule: ReplicationRule) {
        let scheduler = Arc::clone(self);
        let task = self.build_task(key.clone(), rule);
        tokio::spawn(async move {
            if let Err(err) = scheduler.pool.submit(key.clone(), task).await {
                error!(key = %key, error = %err, "failed to submit scheduled job to worker pool");
                let mut jobs = scheduler.jobs.write().await;
                if let Some(job) = jobs.get_mut(&key) {
                    job.running = false;
                    if job.schedule.is_one_shot() {
                        jobs.remove(&key);
                    }
                }
            }
        });
    }

    /// Build the pool task body: the panic barrier and the running-flag
    /// clear both live here, inside the closure the pool itself runs.
    fn build_task(self: &Arc<Self>, key: String, rule: ReplicationRule) -> TaskFn {
        let scheduler = Arc::clone(self);
        Box::new(move |task_cancel| {
            Box::pin(async move {
                let start = StdInstant::now();
                let outcome = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(
                    scheduler.run_one(&task_cancel, &rule),
                ))
                .await;

                let result = match outcome {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload);
                        error!(key = %key, panic = %message, "scheduled job panicked");
                        Err(RegSyncError::Panic(message))
                    }
                };

                if let Err(err) = &result {
                    if err.is_cancelled() {
                        warn!(key = %key, "scheduled job cancelled");
                    } else {
                        error!(key = %key, error = %err, "scheduled job failed");
                    }
                }
                debug!(key = %key, duration = ?start.elapsed(), "scheduled job finished");

                let mut jobs = scheduler.jobs.write().await;
                if let Some(job) = jobs.get_mut(&key) {
                    job.running = false;
                    if job.schedule.is_one_shot() {
                        jobs.remove(&key);
                    }
                }
                drop(jobs);

                match result {
                    Ok(()) => JobOutcome::ok(0),
                    Err(err) => JobOutcome::failed(err),
                }
            })
        })
    }

    async fn run_one(&self, cancel: &CancellationToken, rule: &ReplicationRule) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(RegSyncError::Cancelled(
                cancel.reason().unwrap_or_else(|| "job cancelled before start".into()),
            ));
        }
        self.replication_service.replicate_repository(cancel, rule).await
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}
