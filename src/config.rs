//! Ambient configuration surface.
//!
//! This crate does not parse CLI flags or configuration files: the
//! embedding application binds these knobs from whatever configuration
//! surface it already has and constructs these structs directly. Every
//! field's default matches the documented steady-state behavior, so a
//! caller who supplies `Default::default()` gets sane values out of the
//! box.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for [`crate::pool::WorkerPool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of workers to spawn on `start`.
    pub workers: usize,
    /// Back-pressure timeout for `submit`.
    #[serde(with = "duration_millis")]
    pub submit_timeout: Duration,
    /// Result-publication timeout before a result is dropped with a
    /// warning.
    #[serde(with = "duration_millis")]
    pub result_publish_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            submit_timeout: Duration::from_secs(30),
            result_publish_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Queue (and result-stream) buffer size: `clamp(workers*20, 10, 1000)`.
    pub fn queue_buffer(&self) -> usize {
        (self.workers * 20).clamp(10, 1000)
    }
}

/// Tunables for [`crate::scaler::AutoScaler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScalerConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Target throughput in bytes/sec.
    pub target_bytes_per_sec: f64,
    /// Control-loop tick interval.
    #[serde(with = "duration_millis")]
    pub check_interval: Duration,
    /// Minimum spacing between two adjustments.
    #[serde(with = "duration_millis")]
    pub adjustment_cooldown: Duration,
}

impl Default for AutoScalerConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 16,
            target_bytes_per_sec: 100.0 * 1024.0 * 1024.0,
            check_interval: Duration::from_secs(5),
            adjustment_cooldown: Duration::from_secs(10),
        }
    }
}

/// Tunables for [`crate::scaler::ThroughputTracker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputTrackerConfig {
    /// Sampling period.
    #[serde(with = "duration_millis")]
    pub sample_interval: Duration,
    /// Sliding window length in samples.
    pub window_len: usize,
}

impl Default for ThroughputTrackerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            window_len: 60,
        }
    }
}

/// Tunables for [`crate::rate_limiter::RateLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub capacity: u32,
    #[serde(with = "duration_millis")]
    pub window: Duration,
}

/// Tunables for [`crate::schedule::Scheduler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ticker wake period.
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,
    /// Delay before an `@now`/`@once` job's immediate re-check fires.
    #[serde(with = "duration_millis")]
    pub immediate_check_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            immediate_check_delay: Duration::from_millis(10),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_queue_buffer_is_clamped() {
        assert_eq!(
            PoolConfig {
                workers: 1,
                ..Default::default()
            }
            .queue_buffer(),
            10
        );
        assert_eq!(
            PoolConfig {
                workers: 4,
                ..Default::default()
            }
            .queue_buffer(),
            80
        );
        assert_eq!(
            PoolConfig {
                workers: 1000,
                ..Default::default()
            }
            .queue_buffer(),
            1000
        );
    }

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = AutoScalerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AutoScalerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.min_workers, back.min_workers);
        assert_eq!(cfg.check_interval, back.check_interval);
    }
}
