//! Delivery state machine.
//!
//! ```text
//! queued   ─┬─> delivered        (attempt succeeded)
//! retrying ─┼─> retrying         (attempt failed, attempts remain)
//!           └─> dead_lettered    (attempt failed, attempts exhausted)
//! dead_lettered ──redrive──> queued
//! ```
//!
//! Transitions are pure: they mutate the in-memory record and return the
//! attempt to append. Persisting both atomically is the store's job.

use chrono::{DateTime, Utc};
use tracing::debug;

use conduit_core::DomainError;

use crate::backoff::BackoffPolicy;
use crate::delivery::{ConnectorDelivery, DeliveryStatus, NewAttempt};

/// What a connector transport reported for one attempt.
///
/// Failures are values, not errors: timeouts, non-2xx responses and
/// connection errors all arrive here and drive the retry branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TransportOutcome {
    pub fn succeeded(status_code: Option<u16>, response_body: Option<String>) -> Self {
        Self {
            success: true,
            status_code,
            response_body,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code,
            response_body: None,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    pub fn with_response_body(mut self, body: Option<String>) -> Self {
        self.response_body = body;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Short diagnostic used for `last_error` and dead-letter reasons.
    pub fn summary(&self) -> String {
        match (&self.error, self.status_code) {
            (Some(err), Some(code)) => format!("HTTP {code}: {err}"),
            (Some(err), None) => err.clone(),
            (None, Some(code)) => format!("HTTP {code}"),
            (None, None) => "unknown transport failure".to_string(),
        }
    }
}

/// Apply one attempt's outcome to a pending delivery.
///
/// Returns the attempt record to append alongside the updated delivery.
pub fn apply_outcome(
    delivery: &mut ConnectorDelivery,
    outcome: &TransportOutcome,
    backoff: &BackoffPolicy,
    now: DateTime<Utc>,
) -> Result<NewAttempt, DomainError> {
    if !delivery.status.is_pending() {
        return Err(DomainError::invariant(format!(
            "delivery {} is {} and cannot be attempted",
            delivery.id, delivery.status
        )));
    }
    if delivery.attempt_count >= delivery.max_attempts {
        return Err(DomainError::invariant(format!(
            "delivery {} already used {}/{} attempts",
            delivery.id, delivery.attempt_count, delivery.max_attempts
        )));
    }

    delivery.attempt_count += 1;
    delivery.last_status_code = outcome.status_code;
    delivery.updated_at = now;

    if outcome.success {
        delivery.status = DeliveryStatus::Delivered;
        delivery.delivered_at = Some(now);
        delivery.next_attempt_at = None;
        delivery.last_error = None;
        delivery.dead_letter_reason = None;
        debug!(delivery_id = %delivery.id, attempt = delivery.attempt_count, "delivery delivered");
    } else {
        let summary = outcome.summary();
        delivery.last_error = Some(summary.clone());

        if delivery.attempt_count < delivery.max_attempts {
            let delay = backoff.delay_for_attempt(delivery.id, delivery.attempt_count);
            delivery.status = DeliveryStatus::Retrying;
            delivery.next_attempt_at =
                Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            debug!(
                delivery_id = %delivery.id,
                attempt = delivery.attempt_count,
                delay_ms = delay.as_millis() as u64,
                "delivery attempt failed; retry scheduled"
            );
        } else {
            delivery.status = DeliveryStatus::DeadLettered;
            delivery.next_attempt_at = None;
            delivery.dead_letter_reason = Some(format!(
                "exhausted {} attempt(s); last failure: {summary}",
                delivery.max_attempts
            ));
            debug!(delivery_id = %delivery.id, attempt = delivery.attempt_count, "delivery dead-lettered");
        }
    }

    Ok(NewAttempt {
        success: outcome.success,
        status_code: outcome.status_code,
        error_message: if outcome.success { None } else { Some(outcome.summary()) },
        response_body: outcome.response_body.clone(),
        duration_ms: outcome.duration_ms,
        created_at: now,
    })
}

/// Reset a dead-lettered delivery so the queue picks it up again.
///
/// Only diagnostics are cleared; attempt history lives elsewhere and is kept.
pub fn redrive(delivery: &mut ConnectorDelivery, now: DateTime<Utc>) -> Result<(), DomainError> {
    if delivery.status != DeliveryStatus::DeadLettered {
        return Err(DomainError::invariant(format!(
            "delivery {} is {}; only dead-lettered deliveries can be redriven",
            delivery.id, delivery.status
        )));
    }

    delivery.status = DeliveryStatus::Queued;
    delivery.attempt_count = 0;
    delivery.next_attempt_at = Some(now);
    delivery.dead_letter_reason = None;
    delivery.last_error = None;
    delivery.last_status_code = None;
    delivery.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorTarget, ConnectorType, WebhookTarget};
    use crate::delivery::payload_hash;
    use crate::validation::{DispatchMode, ValidatedDelivery};
    use conduit_core::ProjectId;
    use proptest::prelude::*;
    use serde_json::json;

    fn delivery(max_attempts: u32) -> ConnectorDelivery {
        let payload = json!({"event": "review.approved"});
        let req = ValidatedDelivery {
            project_id: ProjectId::new(),
            connector_type: ConnectorType::Webhook,
            payload_hash: payload_hash(&payload),
            payload,
            target: ConnectorTarget::Webhook(WebhookTarget {
                url: "https://hooks.example.com".to_string(),
                headers: Default::default(),
            }),
            idempotency_key: None,
            mode: DispatchMode::Enqueue,
            max_attempts,
            initial_backoff_ms: 1_000,
        };
        ConnectorDelivery::enqueue(&req, Utc::now())
    }

    fn backoff() -> BackoffPolicy {
        BackoffPolicy::new(1_000).without_jitter()
    }

    #[test]
    fn success_delivers_and_clears_schedule() {
        let mut d = delivery(5);
        let now = Utc::now();
        let attempt = apply_outcome(
            &mut d,
            &TransportOutcome::succeeded(Some(200), Some("ok".to_string())),
            &backoff(),
            now,
        )
        .unwrap();

        assert!(attempt.success);
        assert_eq!(d.status, DeliveryStatus::Delivered);
        assert_eq!(d.attempt_count, 1);
        assert_eq!(d.delivered_at, Some(now));
        assert!(d.next_attempt_at.is_none());
        d.check_invariants().unwrap();
    }

    #[test]
    fn failure_with_attempts_left_schedules_retry() {
        let mut d = delivery(3);
        let now = Utc::now();
        let attempt = apply_outcome(
            &mut d,
            &TransportOutcome::failed(Some(503), "service unavailable"),
            &backoff(),
            now,
        )
        .unwrap();

        assert!(!attempt.success);
        assert_eq!(d.status, DeliveryStatus::Retrying);
        assert_eq!(d.attempt_count, 1);
        assert_eq!(d.next_attempt_at, Some(now + chrono::Duration::milliseconds(1_000)));
        assert_eq!(d.last_status_code, Some(503));
        assert_eq!(d.last_error.as_deref(), Some("HTTP 503: service unavailable"));
        d.check_invariants().unwrap();
    }

    #[test]
    fn two_failures_with_max_two_dead_letters() {
        let mut d = delivery(2);
        let fail = TransportOutcome::failed(None, "connection refused");

        apply_outcome(&mut d, &fail, &backoff(), Utc::now()).unwrap();
        assert_eq!(d.status, DeliveryStatus::Retrying);
        assert_eq!(d.attempt_count, 1);

        apply_outcome(&mut d, &fail, &backoff(), Utc::now()).unwrap();
        assert_eq!(d.status, DeliveryStatus::DeadLettered);
        assert_eq!(d.attempt_count, 2);
        assert!(d.next_attempt_at.is_none());
        assert!(d.dead_letter_reason.as_deref().unwrap().contains("connection refused"));
        d.check_invariants().unwrap();
    }

    #[test]
    fn terminal_deliveries_reject_attempts() {
        let mut d = delivery(1);
        apply_outcome(&mut d, &TransportOutcome::succeeded(Some(204), None), &backoff(), Utc::now())
            .unwrap();

        let err = apply_outcome(
            &mut d,
            &TransportOutcome::succeeded(Some(200), None),
            &backoff(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(d.attempt_count, 1);
    }

    #[test]
    fn redrive_resets_dead_letter() {
        let mut d = delivery(1);
        apply_outcome(&mut d, &TransportOutcome::failed(Some(500), "boom"), &backoff(), Utc::now())
            .unwrap();
        assert_eq!(d.status, DeliveryStatus::DeadLettered);

        let now = Utc::now();
        redrive(&mut d, now).unwrap();
        assert_eq!(d.status, DeliveryStatus::Queued);
        assert_eq!(d.attempt_count, 0);
        assert_eq!(d.next_attempt_at, Some(now));
        assert!(d.dead_letter_reason.is_none());
        assert!(d.last_error.is_none());
        assert!(d.last_status_code.is_none());
        d.check_invariants().unwrap();
    }

    #[test]
    fn redrive_rejects_live_deliveries() {
        let mut d = delivery(3);
        assert!(redrive(&mut d, Utc::now()).is_err());
    }

    #[test]
    fn summary_prefers_error_and_code() {
        assert_eq!(TransportOutcome::failed(Some(429), "slow down").summary(), "HTTP 429: slow down");
        assert_eq!(TransportOutcome::failed(None, "timed out").summary(), "timed out");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever the sequence of outcomes, attempt_count never exceeds
        /// max_attempts and a dead-lettered delivery's last attempt failed.
        #[test]
        fn attempt_count_is_bounded(
            max_attempts in 1u32..=10,
            outcomes in prop::collection::vec(any::<bool>(), 1..20)
        ) {
            let mut d = delivery(max_attempts);
            let mut last_success = None;

            for ok in outcomes {
                let outcome = if ok {
                    TransportOutcome::succeeded(Some(200), None)
                } else {
                    TransportOutcome::failed(Some(500), "err")
                };
                match apply_outcome(&mut d, &outcome, &backoff(), Utc::now()) {
                    Ok(attempt) => last_success = Some(attempt.success),
                    Err(_) => prop_assert!(d.status.is_terminal()),
                }
                prop_assert!(d.attempt_count <= d.max_attempts);
                prop_assert!(d.check_invariants().is_ok());
            }

            if d.status == DeliveryStatus::DeadLettered {
                prop_assert_eq!(last_success, Some(false));
            }
        }
    }
}
