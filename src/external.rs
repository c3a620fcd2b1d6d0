//! Consumed interfaces: the outer collaborators this crate drives but
//! does not implement. A caller supplies concrete adapters; the
//! reconciler and scheduler program only against these traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::error::Result;
use crate::rule::ReplicationRule;

/// Opaque content descriptor for an image manifest. Only `digest` is
/// consulted by the diff algorithm: equal digests imply content
/// equivalence, so two manifests are never compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub digest: String,
    pub media_type: String,
    pub content: Vec<u8>,
}

/// An opaque, registry-specific image reference (source or destination).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference(pub String);

/// An opaque remote-call option (auth, TLS, etc.) passed through to the
/// copier without interpretation by this crate.
#[derive(Debug, Clone)]
pub struct RemoteOption(pub String);

/// A client for one registry endpoint.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn get_repository(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Arc<dyn Repository>>;

    async fn list_repositories(&self, cancel: &CancellationToken, prefix: &str) -> Result<Vec<String>>;

    fn registry_name(&self) -> &str;
}

/// A single repository within a registry.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_tags(&self, cancel: &CancellationToken) -> Result<Vec<String>>;
    async fn get_manifest(&self, cancel: &CancellationToken, tag: &str) -> Result<Manifest>;
    async fn put_manifest(&self, cancel: &CancellationToken, tag: &str, manifest: &Manifest) -> Result<()>;
    async fn delete_manifest(&self, cancel: &CancellationToken, tag: &str) -> Result<()>;
    fn get_image_reference(&self, tag: &str) -> ImageReference;
    fn get_remote_options(&self) -> Vec<RemoteOption>;
    fn name(&self) -> &str;
}

/// Options passed to [`Copier::copy_image`].
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub dry_run: bool,
    pub force_overwrite: bool,
}

/// Outcome of one successful copy.
#[derive(Debug, Clone, Default)]
pub struct CopyResult {
    pub bytes_transferred: u64,
    pub layers: u32,
}

/// The blob/manifest copier. Given source and destination references, it
/// transfers bytes; this crate never inspects layer content itself.
#[async_trait]
pub trait Copier: Send + Sync {
    async fn copy_image(
        &self,
        cancel: &CancellationToken,
        src_ref: &ImageReference,
        dest_ref: &ImageReference,
        src_opts: &[RemoteOption],
        dest_opts: &[RemoteOption],
        options: &CopyOptions,
    ) -> Result<CopyResult>;
}

/// Counters the reconciler reports on completion. All methods must be
/// non-blocking and safe for concurrent invocation.
pub trait MetricsSink: Send + Sync {
    fn tag_copy_started(&self);
    fn tag_copy_completed(&self, bytes: u64);
    fn tag_copy_failed(&self);
    fn repository_copy_completed(&self, total: u64, copied: u64, skipped: u64, failed: u64);
}

/// A no-op sink for callers that don't care about metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn tag_copy_started(&self) {}
    fn tag_copy_completed(&self, _bytes: u64) {}
    fn tag_copy_failed(&self) {}
    fn repository_copy_completed(&self, _total: u64, _copied: u64, _skipped: u64, _failed: u64) {}
}

/// Supplied by the outer application, typically wrapping the reconciler;
/// the scheduler's task body invokes this per fired job.
#[async_trait]
pub trait ReplicationService: Send + Sync {
    async fn replicate_repository(&self, cancel: &CancellationToken, rule: &ReplicationRule) -> Result<()>;
}
