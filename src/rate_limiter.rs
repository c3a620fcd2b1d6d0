//! Token-bucket rate limiter shared by outbound registry calls.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter as GovernorLimiter};

use crate::cancellation::CancellationToken;
use crate::error::{RegSyncError, Result};

/// How often the acquire loop re-checks the underlying bucket while
/// waiting for a token to free up.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Approximates a steady-state rate of `capacity` requests per `window`
/// with burst up to `capacity`.
///
/// Built on `governor`'s GCRA cell: `Quota::with_period(window/capacity)`
/// sets the per-token replenish interval and `allow_burst(capacity)` caps
/// the bucket at `capacity`, which reproduces "initialized full; one
/// token every window/capacity; excess deposits dropped" without a
/// hand-rolled background thread that could drift from the "bucket length
/// never exceeds capacity" invariant under clock skew.
pub struct RateLimiter {
    inner: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
    capacity: u32,
}

impl RateLimiter {
    /// `capacity` must be non-zero; `window` must be non-zero.
    pub fn new(capacity: u32, window: Duration) -> Result<Self> {
        let capacity_nz = NonZeroU32::new(capacity)
            .ok_or_else(|| RegSyncError::InvalidInput("rate limiter capacity must be > 0".into()))?;
        if window.is_zero() {
            return Err(RegSyncError::InvalidInput("rate limiter window must be > 0".into()));
        }
        let period = window / capacity;
        let quota = Quota::with_period(period)
            .ok_or_else(|| RegSyncError::InvalidInput("rate limiter window/capacity underflowed to zero".into()))?
            .allow_burst(capacity_nz);
        Ok(Self {
            inner: GovernorLimiter::direct(quota),
            capacity,
        })
    }

    /// Configured burst capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Non-blocking check: consume a token if one is available.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    /// Block until a token is available, `deadline` elapses, or `cancel`
    /// fires. `Acquire` fails only via deadline or cancellation and never
    /// returns spuriously.
    pub async fn acquire(&self, deadline: Instant, cancel: &CancellationToken) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.inner.check().is_ok() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(RegSyncError::Cancelled(
                    cancel.reason().unwrap_or_else(|| "rate limiter acquire cancelled".into()),
                ));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RegSyncError::DeadlineExceeded {
                    waited: now.saturating_duration_since(start),
                });
            }
            let sleep_for = POLL_INTERVAL.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = cancel.cancelled() => {
                    return Err(RegSyncError::Cancelled(
                        cancel.reason().unwrap_or_else(|| "rate limiter acquire cancelled".into()),
                    ));
                }
            }
        }
    }

    /// Convenience wrapper taking a relative timeout instead of an
    /// absolute deadline.
    pub async fn acquire_within(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        self.acquire(Instant::now() + timeout, cancel).await
    }
}
