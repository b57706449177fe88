//! Exponential backoff with symmetric jitter, and the retry-eligibility table.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::error::{ErrorKind, UploadError};

/// Smallest delay ever returned, so a retry never fires immediately.
pub const MIN_DELAY: Duration = Duration::from_millis(100);

/// Jitter spread as a fraction of the computed delay (±25%).
pub const JITTER_FRACTION: f64 = 0.25;

/// Delay before retry `attempt` (0-based): `min(base * multiplier^attempt, cap)`
/// with ±25% random jitter, floored at [`MIN_DELAY`].
pub fn next_delay(attempt: u32, base: Duration, cap: Duration, multiplier: f64) -> Duration {
    let unit = rand::rng().random_range(-1.0..=1.0);
    delay_with_jitter(attempt, base, cap, multiplier, unit)
}

/// Deterministic core of [`next_delay`]. `unit` in `[-1, 1]` picks the point
/// inside the jitter band.
pub fn delay_with_jitter(
    attempt: u32,
    base: Duration,
    cap: Duration,
    multiplier: f64,
    unit: f64,
) -> Duration {
    let exp = multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
    let raw = (base.as_secs_f64() * exp).min(cap.as_secs_f64());
    let jittered = raw * (1.0 + JITTER_FRACTION * unit.clamp(-1.0, 1.0));
    saturating_secs(jittered.max(MIN_DELAY.as_secs_f64()))
}

/// `Duration` from seconds, saturating at `Duration::MAX` instead of panicking.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Retry eligibility of a kind when nothing overrides it.
pub fn is_retryable(kind: ErrorKind) -> bool {
    kind.default_retryable()
}

/// Caller-tunable retry behaviour. Stateless: attempt counts belong to the caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Per-kind retryability overrides. Ignored for [`ErrorKind::Cancelled`].
    pub overrides: HashMap<ErrorKind, bool>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            overrides: HashMap::new(),
        }
    }
}

impl RetryPolicy {
    pub fn with_override(mut self, kind: ErrorKind, retryable: bool) -> Self {
        self.overrides.insert(kind, retryable);
        self
    }

    /// Applies the override table to a freshly classified error.
    pub fn classify(&self, err: UploadError) -> UploadError {
        match self.overrides.get(&err.kind) {
            Some(&retryable) => err.with_retryable(retryable),
            None => err,
        }
    }

    /// Upper bound of any delay this policy can produce (cap plus jitter ceiling).
    pub fn ceiling(&self) -> Duration {
        saturating_secs(self.max_delay.as_secs_f64() * (1.0 + JITTER_FRACTION)).max(MIN_DELAY)
    }

    /// Delay before retry `attempt`, honouring a server `Retry-After` as a floor.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = next_delay(attempt, self.base_delay, self.max_delay, self.multiplier);
        match retry_after {
            Some(after) => delay.max(after.min(self.ceiling())),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);

    #[test]
    fn grows_exponentially_without_jitter() {
        assert_eq!(delay_with_jitter(0, BASE, CAP, 2.0, 0.0), Duration::from_secs(1));
        assert_eq!(delay_with_jitter(1, BASE, CAP, 2.0, 0.0), Duration::from_secs(2));
        assert_eq!(delay_with_jitter(3, BASE, CAP, 2.0, 0.0), Duration::from_secs(8));
    }

    #[test]
    fn capped_before_jitter() {
        assert_eq!(delay_with_jitter(10, BASE, CAP, 2.0, 0.0), CAP);
        assert_eq!(delay_with_jitter(10, BASE, CAP, 2.0, 1.0), Duration::from_millis(37_500));
        assert_eq!(delay_with_jitter(10, BASE, CAP, 2.0, -1.0), Duration::from_millis(22_500));
    }

    #[test]
    fn huge_attempts_stay_finite() {
        assert_eq!(delay_with_jitter(u32::MAX, BASE, CAP, 2.0, 0.0), CAP);
    }

    #[test]
    fn unbounded_cap_saturates() {
        assert_eq!(delay_with_jitter(70, BASE, Duration::MAX, 2.0, 1.0), Duration::MAX);

        let policy = RetryPolicy {
            max_delay: Duration::MAX,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.ceiling(), Duration::MAX);
        assert!(policy.delay_for(70, None) >= MIN_DELAY);
    }

    #[test]
    fn floor_applies_to_tiny_delays() {
        let d = delay_with_jitter(0, Duration::from_millis(10), CAP, 2.0, -1.0);
        assert_eq!(d, MIN_DELAY);
        assert_eq!(delay_with_jitter(0, Duration::ZERO, CAP, 2.0, 0.0), MIN_DELAY);
    }

    #[test]
    fn random_delays_stay_in_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..40 {
            for _ in 0..50 {
                let d = next_delay(attempt, policy.base_delay, policy.max_delay, policy.multiplier);
                assert!(d >= MIN_DELAY, "attempt {attempt}: {d:?} below floor");
                assert!(d <= policy.ceiling(), "attempt {attempt}: {d:?} above ceiling");
            }
        }
    }

    #[test]
    fn retry_after_raises_delay_but_respects_ceiling() {
        let policy = RetryPolicy::default();
        let d = policy.delay_for(0, Some(Duration::from_secs(10)));
        assert!(d >= Duration::from_secs(10));
        let d = policy.delay_for(0, Some(Duration::from_secs(3600)));
        assert_eq!(d, policy.ceiling());
    }

    #[test]
    fn overrides_change_retryability_except_cancel() {
        let policy = RetryPolicy::default()
            .with_override(ErrorKind::QuotaExceeded, false)
            .with_override(ErrorKind::Cancelled, true);

        let quota = policy.classify(UploadError::new(ErrorKind::QuotaExceeded, "slow down"));
        assert!(!quota.retryable);

        let cancel = policy.classify(UploadError::cancelled());
        assert!(!cancel.retryable);

        let net = policy.classify(UploadError::new(ErrorKind::Network, "reset"));
        assert!(net.retryable);
    }

    #[test]
    fn free_function_matches_table() {
        assert!(is_retryable(ErrorKind::Timeout));
        assert!(!is_retryable(ErrorKind::HashMismatch));
    }
}
