//! Black-box integration tests for the literal scenarios in the
//! repository replication concurrency core's testable-properties section.
//! Each test below names the scenario it exercises. These drive only the
//! public API, against mock `RegistryClient`/`Repository`/`Copier`
//! implementations defined in this file.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use regsync_core::cancellation::CancellationToken;
use regsync_core::config::{AutoScalerConfig, PoolConfig, SchedulerConfig};
use regsync_core::error::{RegSyncError, Result};
use regsync_core::external::{
    Copier, CopyOptions, CopyResult, ImageReference, Manifest, NoopMetricsSink, RegistryClient, RemoteOption,
    ReplicationService, Repository,
};
use regsync_core::pool::{JobOutcome, TaskFn, WorkerPool};
use regsync_core::rate_limiter::RateLimiter;
use regsync_core::reconcile::reconcile_repository;
use regsync_core::rule::ReplicationRule;
use regsync_core::scaler::{AutoScaler, ThroughputTracker};
use regsync_core::schedule::Scheduler;

struct FakeRepo {
    name: String,
    tags: Vec<String>,
    manifests: HashMap<String, Manifest>,
}

#[async_trait]
impl Repository for FakeRepo {
    async fn list_tags(&self, _cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(self.tags.clone())
    }

    async fn get_manifest(&self, _cancel: &CancellationToken, tag: &str) -> Result<Manifest> {
        self.manifests
            .get(tag)
            .cloned()
            .ok_or_else(|| RegSyncError::NotFound(tag.to_string()))
    }

    async fn put_manifest(&self, _cancel: &CancellationToken, _tag: &str, _manifest: &Manifest) -> Result<()> {
        Ok(())
    }

    async fn delete_manifest(&self, _cancel: &CancellationToken, _tag: &str) -> Result<()> {
        Ok(())
    }

    fn get_image_reference(&self, tag: &str) -> ImageReference {
        ImageReference(format!("{}:{}", self.name, tag))
    }

    fn get_remote_options(&self) -> Vec<RemoteOption> {
        vec![]
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct FakeClient {
    registry_name: String,
    repo: Arc<FakeRepo>,
}

#[async_trait]
impl RegistryClient for FakeClient {
    async fn get_repository(&self, _cancel: &CancellationToken, _name: &str) -> Result<Arc<dyn Repository>> {
        Ok(self.repo.clone() as Arc<dyn Repository>)
    }

    async fn list_repositories(&self, _cancel: &CancellationToken, _prefix: &str) -> Result<Vec<String>> {
        Ok(vec![self.repo.name.clone()])
    }

    fn registry_name(&self) -> &str {
        &self.registry_name
    }
}

struct CountingCopier {
    calls: StdMutex<u32>,
}

impl CountingCopier {
    fn new() -> Self {
        Self { calls: StdMutex::new(0) }
    }

    fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Copier for CountingCopier {
    async fn copy_image(
        &self,
        _cancel: &CancellationToken,
        _src: &ImageReference,
        _dest: &ImageReference,
        _src_opts: &[RemoteOption],
        _dest_opts: &[RemoteOption],
        _options: &CopyOptions,
    ) -> Result<CopyResult> {
        *self.calls.lock().unwrap() += 1;
        Ok(CopyResult {
            bytes_transferred: 4096,
            layers: 2,
        })
    }
}

fn manifest(digest: &str) -> Manifest {
    Manifest {
        digest: digest.to_string(),
        media_type: "application/vnd.oci.image.manifest.v1+json".into(),
        content: vec![],
    }
}

fn rule() -> ReplicationRule {
    ReplicationRule {
        source_registry: "src".into(),
        source_repository: "app".into(),
        dest_registry: "dst".into(),
        dest_repository: "app".into(),
        tag_filter: None,
        schedule: None,
        include_tags: vec![],
        exclude_tags: vec![],
        force_overwrite: false,
    }
}

fn client_pair(source_tags: &[&str], dest_tags: &[&str], digest_of: impl Fn(&str) -> String) -> (FakeClient, FakeClient) {
    let source_manifests: HashMap<String, Manifest> =
        source_tags.iter().map(|t| (t.to_string(), manifest(&digest_of(t)))).collect();
    let dest_manifests: HashMap<String, Manifest> =
        dest_tags.iter().map(|t| (t.to_string(), manifest(&digest_of(t)))).collect();

    let source = FakeClient {
        registry_name: "src".into(),
        repo: Arc::new(FakeRepo {
            name: "app".into(),
            tags: source_tags.iter().map(|s| s.to_string()).collect(),
            manifests: source_manifests,
        }),
    };
    let dest = FakeClient {
        registry_name: "dst".into(),
        repo: Arc::new(FakeRepo {
            name: "app".into(),
            tags: dest_tags.iter().map(|s| s.to_string()).collect(),
            manifests: dest_manifests,
        }),
    };
    (source, dest)
}

/// Scenario 1: rate limiter burst. `NewRateLimiter(3, 1s)`: the first
/// three acquires succeed immediately, the fourth blocks roughly one
/// refill period (~333ms) before succeeding.
#[tokio::test]
async fn rate_limiter_burst_then_refill() {
    let limiter = RateLimiter::new(3, Duration::from_secs(1)).unwrap();
    let cancel = CancellationToken::new();

    let start = Instant::now();
    for _ in 0..3 {
        limiter.acquire_within(Duration::from_millis(50), &cancel).await.unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(100), "first three acquires should not block");

    let fourth_start = Instant::now();
    limiter.acquire_within(Duration::from_secs(2), &cancel).await.unwrap();
    assert!(fourth_start.elapsed() >= Duration::from_millis(300));
}

/// Scenario 2: pool saturation back-pressure. One worker, buffer sized to
/// hold ten queued jobs, a 2s task occupying the worker: eleven
/// submissions succeed immediately (one dispatched, ten queued) and a
/// twelfth blocks until a slot frees up.
#[tokio::test]
async fn pool_saturation_back_pressure() {
    let pool = WorkerPool::new(PoolConfig {
        workers: 1,
        submit_timeout: Duration::from_secs(30),
        ..Default::default()
    });
    pool.start().await.unwrap();
    let buffer = {
        // queue_buffer() for workers=1 clamps to 10, matching the scenario.
        let cfg = PoolConfig {
            workers: 1,
            ..Default::default()
        };
        cfg.queue_buffer()
    };
    assert_eq!(buffer, 10);

    let long_task: TaskFn = Box::new(|_cancel| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            JobOutcome::ok(0)
        })
    });
    pool.submit("running", long_task).await.unwrap();

    for i in 0..buffer {
        let quick: TaskFn = Box::new(|_cancel| Box::pin(async move { JobOutcome::ok(0) }));
        pool.submit(format!("queued-{i}"), quick).await.unwrap();
    }

    // The pool is now fully saturated: one running, ten queued. A twelfth
    // submission must wait for the running task to free a slot.
    let start = Instant::now();
    let twelfth: TaskFn = Box::new(|_cancel| Box::pin(async move { JobOutcome::ok(0) }));
    pool.submit("overflow", twelfth).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(100));

    pool.stop().await;
}

/// Scenario 3: reconciler against an empty destination copies every
/// matching source tag.
#[tokio::test]
async fn reconciler_empty_destination_copies_all_tags() {
    let (source, dest) = client_pair(&["latest", "v1", "v2"], &[], |t| format!("sha256:{t}"));
    let pool = WorkerPool::new(PoolConfig::default());
    pool.start().await.unwrap();
    let copier = Arc::new(CountingCopier::new());
    let cancel = CancellationToken::new();

    let summary = reconcile_repository(
        &cancel,
        &rule(),
        &source,
        &dest,
        &pool,
        copier.clone(),
        Arc::new(NoopMetricsSink),
        false,
    )
    .await
    .unwrap();

    assert_eq!(summary.total_tags, 3);
    assert_eq!(summary.copied_tags, 3);
    assert_eq!(summary.skipped_tags, 0);
    assert_eq!(summary.failed_tags, 0);
    assert_eq!(copier.call_count(), 3);
    pool.stop().await;
}

/// Scenario 4: matching digests on both sides skip the copy entirely.
#[tokio::test]
async fn reconciler_matching_digest_is_skipped() {
    let (source, dest) = client_pair(&["latest"], &["latest"], |_| "sha256:abc".to_string());
    let pool = WorkerPool::new(PoolConfig::default());
    pool.start().await.unwrap();
    let copier = Arc::new(CountingCopier::new());
    let cancel = CancellationToken::new();

    let summary = reconcile_repository(
        &cancel,
        &rule(),
        &source,
        &dest,
        &pool,
        copier.clone(),
        Arc::new(NoopMetricsSink),
        false,
    )
    .await
    .unwrap();

    assert_eq!(summary.copied_tags, 0);
    assert_eq!(summary.skipped_tags, 1);
    assert_eq!(summary.failed_tags, 0);
    assert_eq!(copier.call_count(), 0);
    pool.stop().await;
}

/// Scenario 5: `force_overwrite` copies even a matching digest.
#[tokio::test]
async fn reconciler_force_overwrite_copies_matching_digest() {
    let (source, dest) = client_pair(&["latest"], &["latest"], |_| "sha256:abc".to_string());
    let pool = WorkerPool::new(PoolConfig::default());
    pool.start().await.unwrap();
    let copier = Arc::new(CountingCopier::new());
    let cancel = CancellationToken::new();

    let mut forced = rule();
    forced.force_overwrite = true;

    let summary = reconcile_repository(
        &cancel,
        &forced,
        &source,
        &dest,
        &pool,
        copier.clone(),
        Arc::new(NoopMetricsSink),
        false,
    )
    .await
    .unwrap();

    assert_eq!(summary.copied_tags, 1);
    assert_eq!(summary.skipped_tags, 0);
    assert_eq!(summary.failed_tags, 0);
    assert_eq!(copier.call_count(), 1);
    pool.stop().await;
}

struct CountingService {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ReplicationService for CountingService {
    async fn replicate_repository(&self, _cancel: &CancellationToken, _rule: &ReplicationRule) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scenario 6: a rule registered with `@now` fires within 100ms under
/// idle conditions.
#[tokio::test]
async fn scheduler_now_fires_within_100ms() {
    let calls = Arc::new(AtomicU32::new(0));
    let pool = WorkerPool::new(PoolConfig::default());
    pool.start().await.unwrap();
    let scheduler = Scheduler::new(
        Arc::clone(&pool),
        HashMap::new(),
        Arc::new(CountingService { calls: calls.clone() }),
        SchedulerConfig {
            tick_interval: Duration::from_secs(3600),
            immediate_check_delay: Duration::from_millis(5),
        },
    );
    let handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    let start = Instant::now();
    scheduler
        .add_job(ReplicationRule {
            schedule: Some("@now".into()),
            ..rule()
        })
        .await
        .unwrap();

    while calls.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(1) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() <= Duration::from_millis(150));

    scheduler.stop();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    pool.stop().await;
}

/// Scenario 7: a saturated pool (min=2, max=10) scaled under a sustained
/// queue depth of 40 reaches between 4 and 10 workers within three
/// control ticks, and never exceeds the configured maximum.
#[tokio::test]
async fn auto_scaler_ramps_up_under_sustained_saturation() {
    let pool = WorkerPool::new(PoolConfig {
        workers: 2,
        ..Default::default()
    });
    pool.start().await.unwrap();

    // Occupy every worker with a long sleeper and pad the queue to a
    // sustained depth of 40, matching the scenario's saturated-queue input.
    for i in 0..2 {
        let sleeper: TaskFn = Box::new(|_cancel| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                JobOutcome::ok(0)
            })
        });
        pool.submit(format!("occupy-{i}"), sleeper).await.unwrap();
    }
    for i in 0..40 {
        let queued: TaskFn = Box::new(|_cancel| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                JobOutcome::ok(0)
            })
        });
        pool.submit(format!("queued-{i}"), queued).await.unwrap();
    }

    let tracker = ThroughputTracker::new(Default::default());
    let scaler = AutoScaler::new(AutoScalerConfig {
        min_workers: 2,
        max_workers: 10,
        target_bytes_per_sec: 100.0 * 1024.0 * 1024.0,
        check_interval: Duration::from_millis(10),
        adjustment_cooldown: Duration::from_millis(0),
    });

    for _ in 0..3 {
        scaler.tick(&pool, tracker.as_ref());
        // scale_to spawns the worker-count change; give it a moment to land.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let workers = pool.current_workers();
    assert!(workers >= 4, "expected at least 4 workers after ramp-up, got {workers}");
    assert!(workers <= 10, "worker count must never exceed max_workers, got {workers}");

    pool.stop().await;
}

/// Universal invariant: `copied + skipped + failed == total_tags`, and a
/// non-matching tag never contributes to `total_tags` at all.
#[tokio::test]
async fn reconciler_counters_always_partition_total_tags() {
    let (source, dest) = client_pair(
        &["v1", "v2", "ignored-build"],
        &["v1"],
        |t| if t == "v1" { "sha256:same".to_string() } else { format!("sha256:{t}") },
    );
    let pool = WorkerPool::new(PoolConfig::default());
    pool.start().await.unwrap();
    let copier = Arc::new(CountingCopier::new());
    let cancel = CancellationToken::new();

    let mut filtered = rule();
    filtered.tag_filter = Some("v*".into());

    let summary = reconcile_repository(
        &cancel,
        &filtered,
        &source,
        &dest,
        &pool,
        copier.clone(),
        Arc::new(NoopMetricsSink),
        false,
    )
    .await
    .unwrap();

    // "ignored-build" never matches the "v*" filter, so it's excluded from
    // total_tags entirely, leaving only v1 (digest match -> skip) and v2
    // (no destination copy -> copy).
    assert_eq!(summary.total_tags, 2);
    assert_eq!(summary.copied_tags + summary.skipped_tags + summary.failed_tags, summary.total_tags);
    pool.stop().await;
}

/// An unreachable destination repository surfaces as a reconciler error
/// rather than a silent success, since `get_repository` failing is not
/// one of the documented "skip with warning" cases (only a per-tag
/// source-manifest fetch failure during diff degrades to a skip).
#[tokio::test]
async fn reconciler_propagates_repository_lookup_failure() {
    struct FailingClient;

    #[async_trait]
    impl RegistryClient for FailingClient {
        async fn get_repository(&self, _cancel: &CancellationToken, name: &str) -> Result<Arc<dyn Repository>> {
            Err(RegSyncError::NotFound(name.to_string()))
        }
        async fn list_repositories(&self, _cancel: &CancellationToken, _prefix: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn registry_name(&self) -> &str {
            "unreachable"
        }
    }

    let (source, _unused) = client_pair(&["latest"], &[], |t| format!("sha256:{t}"));
    let dest = FailingClient;
    let pool = WorkerPool::new(PoolConfig::default());
    pool.start().await.unwrap();
    let copier = Arc::new(CountingCopier::new());
    let cancel = CancellationToken::new();

    let err = reconcile_repository(
        &cancel,
        &rule(),
        &source,
        &dest,
        &pool,
        copier.clone(),
        Arc::new(NoopMetricsSink),
        false,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, RegSyncError::NotFound(_)));
    assert_eq!(copier.call_count(), 0);
    pool.stop().await;
}
