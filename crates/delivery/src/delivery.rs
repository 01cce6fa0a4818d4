//! Delivery and attempt records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use conduit_core::{AttemptId, DeliveryId, DomainError, ProjectId};

use crate::connector::{ConnectorTarget, ConnectorType};
use crate::validation::ValidatedDelivery;

/// Lifecycle state of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, waiting for its first attempt.
    Queued,
    /// At least one attempt failed; another one is scheduled.
    Retrying,
    /// An attempt succeeded (terminal).
    Delivered,
    /// Retries exhausted (terminal until redriven).
    DeadLettered,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::DeadLettered)
    }

    /// Statuses eligible for a queue-drain pass.
    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryStatus::Queued | DeliveryStatus::Retrying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::DeadLettered => "dead_lettered",
        }
    }
}

impl core::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "retrying" => Ok(DeliveryStatus::Retrying),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "dead_lettered" => Ok(DeliveryStatus::DeadLettered),
            other => Err(DomainError::validation(format!(
                "unknown delivery status '{other}'"
            ))),
        }
    }
}

/// Defaults applied when the caller does not override retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryDefaults {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for DeliveryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
        }
    }
}

/// One outbound event tracked through its retry lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDelivery {
    pub id: DeliveryId,
    pub project_id: ProjectId,
    pub connector_type: ConnectorType,
    pub idempotency_key: Option<String>,
    /// Advisory content fingerprint; never used to reject a delivery.
    pub payload_hash: String,
    pub payload: JsonValue,
    pub target: ConnectorTarget,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub dead_letter_reason: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectorDelivery {
    /// Build a fresh, immediately-due delivery from a validated request.
    pub fn enqueue(request: &ValidatedDelivery, now: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryId::new(),
            project_id: request.project_id,
            connector_type: request.connector_type,
            idempotency_key: request.idempotency_key.clone(),
            payload_hash: request.payload_hash.clone(),
            payload: request.payload.clone(),
            target: request.target.clone(),
            status: DeliveryStatus::Queued,
            attempt_count: 0,
            max_attempts: request.max_attempts,
            initial_backoff_ms: request.initial_backoff_ms,
            last_status_code: None,
            last_error: None,
            next_attempt_at: Some(now),
            dead_letter_reason: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_pending() && self.next_attempt_at.is_some_and(|at| at <= now)
    }

    /// Check the record-level invariants that every persisted delivery must hold.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.attempt_count > self.max_attempts {
            return Err(DomainError::invariant(format!(
                "attempt_count {} exceeds max_attempts {}",
                self.attempt_count, self.max_attempts
            )));
        }
        if self.status.is_pending() != self.next_attempt_at.is_some() {
            return Err(DomainError::invariant(
                "next_attempt_at must be set exactly while queued or retrying",
            ));
        }
        if (self.status == DeliveryStatus::Delivered) != self.delivered_at.is_some() {
            return Err(DomainError::invariant(
                "delivered_at must be set exactly when delivered",
            ));
        }
        if self.status == DeliveryStatus::DeadLettered
            && (self.attempt_count != self.max_attempts || self.dead_letter_reason.is_none())
        {
            return Err(DomainError::invariant(
                "dead-lettered deliveries must have exhausted their attempts and carry a reason",
            ));
        }
        Ok(())
    }
}

/// Outcome of one attempt, before the store assigns its id and attempt number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttempt {
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorDeliveryAttempt {
    pub id: AttemptId,
    pub delivery_id: DeliveryId,
    pub project_id: ProjectId,
    pub connector_type: ConnectorType,
    /// 1-based and contiguous over the whole life of the delivery (redrives included).
    pub attempt_number: u32,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub response_body: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ConnectorDeliveryAttempt {
    pub fn from_new(delivery: &ConnectorDelivery, attempt_number: u32, new: NewAttempt) -> Self {
        Self {
            id: AttemptId::new(),
            delivery_id: delivery.id,
            project_id: delivery.project_id,
            connector_type: delivery.connector_type,
            attempt_number,
            success: new.success,
            status_code: new.status_code,
            error_message: new.error_message,
            response_body: new.response_body,
            duration_ms: new.duration_ms,
            created_at: new.created_at,
        }
    }
}

/// SHA-256 of the payload's canonical JSON encoding, hex encoded.
///
/// `serde_json` keeps object keys sorted, so logically equal payloads hash equally.
pub fn payload_hash(payload: &JsonValue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
