//! Concurrency and scheduling core for scheduled container-image
//! registry replication.
//!
//! Five components compose the control flow `Scheduler -> Reconciler ->
//! Worker Pool -> Copier -> Rate Limiter`:
//!
//! - [`rate_limiter`]: token-bucket rate limiting for outbound registry
//!   calls.
//! - [`pool`]: a bounded worker pool with back-pressured submission,
//!   cancellation, and a stats collector.
//! - [`scaler`]: throughput tracking and an auto-scaler control loop
//!   driving the pool's worker count.
//! - [`reconcile`]: diff-then-copy reconciliation between a source and
//!   destination repository.
//! - [`schedule`]: cron-driven scheduling of replication rules.
//!
//! [`external`] defines the interfaces this crate consumes but does not
//! implement (registry client, copier, metrics sink); a caller supplies
//! concrete adapters.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod cancellation;
pub mod config;
pub mod error;
pub mod external;
pub mod pool;
pub mod reconcile;
pub mod rule;
pub mod rate_limiter;
pub mod scaler;
pub mod schedule;

pub use cancellation::CancellationToken;
pub use error::{RegSyncError, Result};
pub use rule::ReplicationRule;
