//! Backpressure resolution for queue-drain passes.

use serde::{Deserialize, Serialize};

use crate::validation::FieldError;

/// Upper bound accepted for the retrying/due-now thresholds.
pub const MAX_THRESHOLD: u32 = 100_000;

/// Thresholds that decide when a drain pass should shrink its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retrying")]
    pub max_retrying: u32,
    #[serde(default = "default_max_due_now")]
    pub max_due_now: u32,
    #[serde(default = "default_min_limit")]
    pub min_limit: u32,
}

fn default_max_retrying() -> u32 {
    50
}

fn default_max_due_now() -> u32 {
    100
}

fn default_min_limit() -> u32 {
    1
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retrying: default_max_retrying(),
            max_due_now: default_max_due_now(),
            min_limit: default_min_limit(),
        }
    }
}

impl BackpressureConfig {
    pub fn enabled(max_retrying: u32, max_due_now: u32, min_limit: u32) -> Self {
        Self {
            enabled: true,
            max_retrying,
            max_due_now,
            min_limit,
        }
    }

    pub fn validate(&self, prefix: &str) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.min_limit == 0 || self.min_limit > 100 {
            errors.push(FieldError::new(
                format!("{prefix}.min_limit"),
                "must be between 1 and 100",
            ));
        }
        if self.max_retrying > MAX_THRESHOLD {
            errors.push(FieldError::new(
                format!("{prefix}.max_retrying"),
                format!("must be at most {MAX_THRESHOLD}"),
            ));
        }
        if self.max_due_now > MAX_THRESHOLD {
            errors.push(FieldError::new(
                format!("{prefix}.max_due_now"),
                format!("must be at most {MAX_THRESHOLD}"),
            ));
        }
        errors
    }
}

/// Live queue counts for one project + connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub queued: u64,
    pub retrying: u64,
    pub delivered: u64,
    pub dead_lettered: u64,
    /// Queued or retrying deliveries whose `next_attempt_at` has passed.
    pub due_now: u64,
}

/// Why a drain pass was throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleReason {
    RetryingLimit,
    DueNowLimit,
}

impl ThrottleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleReason::RetryingLimit => "retrying_limit",
            ThrottleReason::DueNowLimit => "due_now_limit",
        }
    }
}

/// Output of [`resolve_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureDecision {
    pub requested_limit: u32,
    pub effective_limit: u32,
    pub throttled: bool,
    pub reason: Option<ThrottleReason>,
}

/// Compute the batch size for a drain pass.
///
/// Pure: identical inputs always yield the identical decision. The effective
/// limit stays within `[min_limit, requested_limit]`; when `min_limit` exceeds
/// the requested limit the requested limit wins, a pass never grows past what
/// the caller asked for.
pub fn resolve_limit(
    requested_limit: u32,
    summary: &DeliverySummary,
    config: Option<&BackpressureConfig>,
) -> BackpressureDecision {
    let unthrottled = BackpressureDecision {
        requested_limit,
        effective_limit: requested_limit,
        throttled: false,
        reason: None,
    };

    let Some(config) = config.filter(|c| c.enabled) else {
        return unthrottled;
    };

    let reason = if summary.retrying > u64::from(config.max_retrying) {
        ThrottleReason::RetryingLimit
    } else if summary.due_now > u64::from(config.max_due_now) {
        ThrottleReason::DueNowLimit
    } else {
        return unthrottled;
    };

    let floor = config.min_limit.min(requested_limit);
    let effective_limit = (requested_limit / 2).clamp(floor, requested_limit);

    BackpressureDecision {
        requested_limit,
        effective_limit,
        throttled: true,
        reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn summary(retrying: u64, due_now: u64) -> DeliverySummary {
        DeliverySummary {
            retrying,
            due_now,
            ..Default::default()
        }
    }

    #[test]
    fn disabled_or_absent_config_passes_through() {
        let s = summary(1_000, 1_000);
        let d = resolve_limit(10, &s, None);
        assert_eq!(d.effective_limit, 10);
        assert!(!d.throttled);

        let d = resolve_limit(10, &s, Some(&BackpressureConfig::default()));
        assert_eq!(d.effective_limit, 10);
        assert!(!d.throttled);
    }

    #[test]
    fn retrying_over_limit_halves_batch() {
        let cfg = BackpressureConfig::enabled(50, 100, 1);
        let d = resolve_limit(10, &summary(60, 10), Some(&cfg));

        assert!(d.throttled);
        assert_eq!(d.reason, Some(ThrottleReason::RetryingLimit));
        assert!(d.effective_limit < 10);
        assert!(d.effective_limit >= 1);
        assert_eq!(d.effective_limit, 5);
    }

    #[test]
    fn due_now_over_limit_throttles_when_retrying_is_fine() {
        let cfg = BackpressureConfig::enabled(50, 100, 1);
        let d = resolve_limit(20, &summary(10, 150), Some(&cfg));

        assert!(d.throttled);
        assert_eq!(d.reason, Some(ThrottleReason::DueNowLimit));
        assert_eq!(d.effective_limit, 10);
    }

    #[test]
    fn retrying_reason_wins_when_both_exceeded() {
        let cfg = BackpressureConfig::enabled(5, 5, 1);
        let d = resolve_limit(8, &summary(6, 6), Some(&cfg));
        assert_eq!(d.reason, Some(ThrottleReason::RetryingLimit));
    }

    #[test]
    fn thresholds_are_strict() {
        let cfg = BackpressureConfig::enabled(50, 100, 1);
        let d = resolve_limit(10, &summary(50, 100), Some(&cfg));
        assert!(!d.throttled);
    }

    #[test]
    fn min_limit_floors_the_reduction() {
        let cfg = BackpressureConfig::enabled(0, 0, 8);
        let d = resolve_limit(10, &summary(1, 0), Some(&cfg));
        assert_eq!(d.effective_limit, 8);

        let d = resolve_limit(1, &summary(1, 0), Some(&cfg));
        assert_eq!(d.effective_limit, 1);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: BackpressureConfig = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert_eq!(cfg, BackpressureConfig::enabled(50, 100, 1));
    }

    #[test]
    fn validate_rejects_zero_min_limit() {
        let cfg = BackpressureConfig::enabled(1, 1, 0);
        let errors = cfg.validate("backpressure");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "backpressure.min_limit");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: the resolver is pure and keeps the limit inside its bounds.
        #[test]
        fn resolver_is_pure_and_bounded(
            requested in 1u32..=100,
            retrying in 0u64..500,
            due_now in 0u64..500,
            enabled in any::<bool>(),
            max_retrying in 0u32..300,
            max_due_now in 0u32..300,
            min_limit in 1u32..=100,
        ) {
            let cfg = BackpressureConfig { enabled, max_retrying, max_due_now, min_limit };
            let s = summary(retrying, due_now);

            let first = resolve_limit(requested, &s, Some(&cfg));
            let second = resolve_limit(requested, &s, Some(&cfg));
            prop_assert_eq!(first, second);

            prop_assert!(first.effective_limit <= requested);
            prop_assert!(first.effective_limit >= min_limit.min(requested));

            let should_throttle = enabled
                && (retrying > u64::from(max_retrying) || due_now > u64::from(max_due_now));
            prop_assert_eq!(first.throttled, should_throttle);
            prop_assert_eq!(first.reason.is_some(), should_throttle);
        }
    }
}
