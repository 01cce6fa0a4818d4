//! Retry backoff for failed delivery attempts.

use std::time::Duration;

use conduit_core::DeliveryId;

use crate::delivery::ConnectorDelivery;

/// Upper bound on any single retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// Bounded exponential backoff with jitter.
///
/// The delay for attempt `n` (1-indexed) is `initial * 2^(n-1)`, capped at
/// `max`, plus up to `jitter * delay` extra. The jitter sample is derived from
/// the delivery id and attempt number, so every delivery gets its own spread
/// while a given (delivery, attempt) pair always produces the same delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(initial_backoff_ms: u64) -> Self {
        Self {
            initial: Duration::from_millis(initial_backoff_ms),
            max: MAX_BACKOFF,
            jitter: 0.2,
        }
    }

    /// Policy seeded from the delivery's own `initial_backoff_ms`.
    pub fn for_delivery(delivery: &ConnectorDelivery) -> Self {
        Self::new(delivery.initial_backoff_ms)
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before jitter for a given attempt number (1-indexed).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);

        Duration::from_millis((base_ms * exp).min(max_ms) as u64)
    }

    /// Full delay (with jitter) for a delivery's attempt number (1-indexed).
    pub fn delay_for_attempt(&self, delivery_id: DeliveryId, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let extra_ms = base.as_millis() as f64 * jitter * jitter_sample(delivery_id, attempt);
        (base + Duration::from_millis(extra_ms as u64)).min(self.max)
    }
}

/// Uniform-ish sample in `[0, 1)` from the delivery id and attempt (splitmix64).
fn jitter_sample(delivery_id: DeliveryId, attempt: u32) -> f64 {
    let id = delivery_id.as_uuid().as_u128();
    let mut x = (id as u64) ^ ((id >> 64) as u64) ^ u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = BackoffPolicy::new(100).without_jitter();
        let id = DeliveryId::new();

        assert_eq!(policy.delay_for_attempt(id, 1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(id, 2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(id, 3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(id, 4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = BackoffPolicy::new(60_000);
        let id = DeliveryId::new();

        for attempt in 1..=40 {
            assert!(policy.delay_for_attempt(id, attempt) <= MAX_BACKOFF);
        }
        assert_eq!(policy.base_delay(30), MAX_BACKOFF);
    }

    #[test]
    fn jitter_stays_within_bounds_and_is_stable() {
        let policy = BackoffPolicy::new(1_000);
        for _ in 0..100 {
            let id = DeliveryId::new();
            let d = policy.delay_for_attempt(id, 3);
            assert!(d >= Duration::from_millis(4_000));
            assert!(d <= Duration::from_millis(4_800));
            assert_eq!(d, policy.delay_for_attempt(id, 3));
        }
    }

    #[test]
    fn zero_attempt_has_no_delay() {
        assert_eq!(BackoffPolicy::new(500).base_delay(0), Duration::ZERO);
    }
}
