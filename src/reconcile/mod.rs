//! Diff-then-copy reconciliation between a source and destination
//! repository.

pub mod glob;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::error::{RegSyncError, Result};
use crate::external::{CopyOptions, Copier, MetricsSink, RegistryClient};
use crate::pool::{JobOutcome, TaskFn, WorkerPool};
use crate::rule::ReplicationRule;

/// Atomic counters tracked through one reconciliation.
#[derive(Debug, Default)]
pub struct ReconcileCounters {
    pub total_tags: AtomicU64,
    pub skipped_tags: AtomicU64,
    pub copied_tags: AtomicU64,
    pub failed_tags: AtomicU64,
    pub bytes_transferred: AtomicU64,
}

/// A point-in-time read of [`ReconcileCounters`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileSummary {
    pub total_tags: u64,
    pub skipped_tags: u64,
    pub copied_tags: u64,
    pub failed_tags: u64,
    pub bytes_transferred: u64,
}

impl ReconcileCounters {
    fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            total_tags: self.total_tags.load(Ordering::Relaxed),
            skipped_tags: self.skipped_tags.load(Ordering::Relaxed),
            copied_tags: self.copied_tags.load(Ordering::Relaxed),
            failed_tags: self.failed_tags.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}

/// Reconciles one source-to-destination mapping: lists tags on both
/// sides, diffs by digest, and submits a copy job for every tag that
/// needs one. When `dry_run` is set, matched tags are logged and counted
/// as copied without the copier ever being invoked.
pub async fn reconcile_repository(
    cancel: &CancellationToken,
    rule: &ReplicationRule,
    source_client: &dyn RegistryClient,
    dest_client: &dyn RegistryClient,
    pool: &Arc<WorkerPool>,
    copier: Arc<dyn Copier>,
    metrics: Arc<dyn MetricsSink>,
    dry_run: bool,
) -> Result<ReconcileSummary> {
    rule.validate_identity()
        .map_err(RegSyncError::InvalidInput)?;

    let source_repo = source_client.get_repository(cancel, &rule.source_repository).await?;
    let dest_repo = dest_client.get_repository(cancel, &rule.dest_repository).await?;

    let source_tags = source_repo.list_tags(cancel).await?;
    let dest_tags: HashSet<String> = dest_repo.list_tags(cancel).await?.into_iter().collect();

    let counters = Arc::new(ReconcileCounters::default());
    let mut first_error: Option<RegSyncError> = None;
    let mut submitted = 0usize;
    // A local completion channel, not the pool's shared result stream:
    // the pool may be serving other concurrent reconciliations, and
    // reading from its stream here would steal their results.
    let (completion_tx, mut completion_rx) =
        tokio::sync::mpsc::unbounded_channel::<std::result::Result<(), String>>();

    for tag in source_tags {
        if !rule.tag_matches(&tag) {
            continue;
        }
        counters.total_tags.fetch_add(1, Ordering::Relaxed);

        let needs_copy = if rule.force_overwrite || !dest_tags.contains(&tag) {
            true
        } else {
            match decide_by_digest(cancel, source_repo.as_ref(), dest_repo.as_ref(), &tag).await {
                DigestDecision::Copy => true,
                DigestDecision::Skip => false,
            }
        };

        if !needs_copy {
            counters.skipped_tags.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        metrics.tag_copy_started();
        let job_id = format!("{}:{}:{}", rule.rule_key(), tag, uuid::Uuid::new_v4());

        let task = build_copy_task(
            rule.clone(),
            tag.clone(),
            Arc::clone(&source_repo),
            Arc::clone(&dest_repo),
            Arc::clone(&copier),
            Arc::clone(&counters),
            Arc::clone(&metrics),
            completion_tx.clone(),
            dry_run,
        );

        match pool.submit(job_id, task).await {
            Ok(()) => submitted += 1,
            Err(err) => {
                counters.failed_tags.fetch_add(1, Ordering::Relaxed);
                metrics.tag_copy_failed();
                warn!(tag = %tag, error = %err, "failed to submit copy job");
                first_error.get_or_insert(err);
            }
        }
    }

    drop(completion_tx);
    for _ in 0..submitted {
        if let Some(Err(error)) = completion_rx.recv().await {
            first_error.get_or_insert(RegSyncError::transient("tag copy", anyhow::anyhow!(error)));
        }
    }

    let summary = counters.summary();
    metrics.repository_copy_completed(
        summary.total_tags,
        summary.copied_tags,
        summary.skipped_tags,
        summary.failed_tags,
    );
    info!(
        source = %rule.source_repository,
        dest = %rule.dest_repository,
        total = summary.total_tags,
        copied = summary.copied_tags,
        skipped = summary.skipped_tags,
        failed = summary.failed_tags,
        "reconciliation complete"
    );

    match first_error {
        Some(err) if summary.failed_tags > 0 => Err(err),
        _ => Ok(summary),
    }
}

enum DigestDecision {
    Copy,
    Skip,
}

async fn decide_by_digest(
    cancel: &CancellationToken,
    source_repo: &dyn crate::external::Repository,
    dest_repo: &dyn crate::external::Repository,
    tag: &str,
) -> DigestDecision {
    let source_manifest = match source_repo.get_manifest(cancel, tag).await {
        Ok(m) => m,
        Err(err) => {
            warn!(tag, error = %err, "source manifest fetch failed during diff; skipping tag this run");
            return DigestDecision::Skip;
        }
    };
    match dest_repo.get_manifest(cancel, tag).await {
        Ok(dest_manifest) if dest_manifest.digest == source_manifest.digest => DigestDecision::Skip,
        Ok(_) => DigestDecision::Copy,
        Err(_) => DigestDecision::Copy,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_copy_task(
    rule: ReplicationRule,
    tag: String,
    source_repo: Arc<dyn crate::external::Repository>,
    dest_repo: Arc<dyn crate::external::Repository>,
    copier: Arc<dyn Copier>,
    counters: Arc<ReconcileCounters>,
    metrics: Arc<dyn MetricsSink>,
    completion: tokio::sync::mpsc::UnboundedSender<std::result::Result<(), String>>,
    dry_run: bool,
) -> TaskFn {
    Box::new(move |cancel| {
        Box::pin(async move {
            if dry_run {
                info!(tag = %tag, "dry run: counting tag as copied without transferring");
                counters.copied_tags.fetch_add(1, Ordering::Relaxed);
                metrics.tag_copy_completed(0);
                let _ = completion.send(Ok(()));
                return JobOutcome::ok(0);
            }

            let src_ref = source_repo.get_image_reference(&tag);
            let dest_ref = dest_repo.get_image_reference(&tag);
            let options = CopyOptions {
                dry_run: false,
                force_overwrite: rule.force_overwrite,
            };

            let outcome = match copier
                .copy_image(
                    &cancel,
                    &src_ref,
                    &dest_ref,
                    &source_repo.get_remote_options(),
                    &dest_repo.get_remote_options(),
                    &options,
                )
                .await
            {
                Ok(copy_result) => {
                    counters.copied_tags.fetch_add(1, Ordering::Relaxed);
                    counters
                        .bytes_transferred
                        .fetch_add(copy_result.bytes_transferred, Ordering::Relaxed);
                    metrics.tag_copy_completed(copy_result.bytes_transferred);
                    let _ = completion.send(Ok(()));
                    JobOutcome::ok(copy_result.bytes_transferred)
                }
                Err(err) => {
                    counters.failed_tags.fetch_add(1, Ordering::Relaxed);
                    metrics.tag_copy_failed();
                    let _ = completion.send(Err(err.to_string()));
                    JobOutcome::failed(err)
                }
            };
            outcome
        })
    })
}

/// Reconciles every rule against registry clients looked up by name from
/// `clients`, continuing past per-rule failures.
pub async fn reconcile_all(
    cancel: &CancellationToken,
    rules: &[ReplicationRule],
    clients: &HashMap<String, Arc<dyn RegistryClient>>,
    pool: &Arc<WorkerPool>,
    copier: Arc<dyn Copier>,
    metrics: Arc<dyn MetricsSink>,
    dry_run: bool,
) -> Vec<(ReplicationRule, Result<ReconcileSummary>)> {
    let mut results = Vec::with_capacity(rules.len());
    for rule in rules {
        let outcome = reconcile_one(
            cancel,
            rule,
            clients,
            pool,
            Arc::clone(&copier),
            Arc::clone(&metrics),
            dry_run,
        )
        .await;
        results.push((rule.clone(), outcome));
    }
    results
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_one(
    cancel: &CancellationToken,
    rule: &ReplicationRule,
    clients: &HashMap<String, Arc<dyn RegistryClient>>,
    pool: &Arc<WorkerPool>,
    copier: Arc<dyn Copier>,
    metrics: Arc<dyn MetricsSink>,
    dry_run: bool,
) -> Result<ReconcileSummary> {
    let source_client = clients
        .get(&rule.source_registry)
        .ok_or_else(|| RegSyncError::NotFound(format!("no registry client for '{}'", rule.source_registry)))?;
    let dest_client = clients
        .get(&rule.dest_registry)
        .ok_or_else(|| RegSyncError::NotFound(format!("no registry client for '{}'", rule.dest_registry)))?;
    reconcile_repository(
        cancel,
        rule,
        source_client.as_ref(),
        dest_client.as_ref(),
        pool,
        copier,
        metrics,
        dry_run,
    )
    .await
}
