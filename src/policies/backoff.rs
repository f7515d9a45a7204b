//! # Backoff policy for respawning crashed clusters.
//!
//! [`BackoffPolicy`] controls how long a supervisor waits before respawning a
//! crashed cluster process. It is parameterized by:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for consecutive crash `n` is `first × factor^n`, clamped to `max`.
//! The default is a constant 5 second delay (`factor = 1.0`) with no retry cap:
//! a cluster that keeps crashing is respawned every 5 seconds indefinitely.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use shardvisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::default();
//! assert_eq!(backoff.next(0), Duration::from_secs(5));
//! assert_eq!(backoff.next(7), Duration::from_secs(5));
//!
//! let growing = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//! };
//! assert_eq!(growing.next(1), Duration::from_secs(2));
//! assert_eq!(growing.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::config::de_millis;

/// Respawn backoff policy.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first respawn.
    #[serde(rename = "first_ms", deserialize_with = "de_millis")]
    pub first: Duration,
    /// Maximum delay cap.
    #[serde(rename = "max_ms", deserialize_with = "de_millis")]
    pub max: Duration,
    /// Multiplicative growth factor (`1.0` = constant).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Returns a constant policy: `first = max = 5s`, `factor = 1.0`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(5),
            factor: 1.0,
        }
    }
}

impl BackoffPolicy {
    /// Constant delay policy.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
        }
    }

    /// Computes the delay before respawn number `attempt` (0-indexed, counts
    /// consecutive crashes of one cluster).
    ///
    /// Non-finite or out-of-range intermediate values clamp to [`BackoffPolicy::max`].
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_constant_five_seconds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..20 {
            assert_eq!(policy.next(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_exponential_growth() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
        };

        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            factor: 1.0,
        };
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
        };
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_deserialize_from_millis() {
        let policy: BackoffPolicy =
            toml::from_str("first_ms = 250\nmax_ms = 1000\nfactor = 2.0").expect("valid toml");
        assert_eq!(policy.first, Duration::from_millis(250));
        assert_eq!(policy.max, Duration::from_secs(1));
        assert_eq!(policy.next(5), Duration::from_secs(1));
    }
}
