//! Connector reliability scoring and remediation selection.
//!
//! Scores are computed from a lookback window of attempt history; actions are
//! ranked by score, capped, and then filtered by a cooldown over previously
//! executed actions. Everything here is pure.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::backpressure::DeliverySummary;
use crate::connector::ConnectorType;

/// Weight of the attempt failure rate.
const FAILURE_WEIGHT: f64 = 70.0;
/// Ceiling contributed by dead letters; saturates as the count grows.
const DEAD_LETTER_WEIGHT: f64 = 30.0;
/// Dead-letter count at which half of [`DEAD_LETTER_WEIGHT`] is reached.
const DEAD_LETTER_HALF_POINT: f64 = 5.0;
/// Discount earned by deliveries that recovered after failing.
const RECOVERY_CREDIT: f64 = 20.0;

/// Raw counts for one connector over the lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorHistory {
    pub attempts: u64,
    pub failed_attempts: u64,
    /// Deliveries dead-lettered inside the window.
    pub dead_lettered: u64,
    /// Deliveries that succeeded after at least one failed attempt.
    pub recovered: u64,
    /// Sum of first-attempt-to-success time over recovered deliveries.
    pub total_recovery_ms: u64,
    /// Live queue counts, used to pick the remediation kind.
    pub summary: DeliverySummary,
}

impl ConnectorHistory {
    pub fn failure_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.failed_attempts.min(self.attempts) as f64 / self.attempts as f64
        }
    }

    pub fn recovery_rate(&self) -> f64 {
        let resolved = self.recovered + self.dead_lettered;
        if resolved == 0 {
            0.0
        } else {
            self.recovered as f64 / resolved as f64
        }
    }

    pub fn mean_recovery_ms(&self) -> Option<u64> {
        (self.recovered > 0).then(|| self.total_recovery_ms / self.recovered)
    }
}

/// Risk in `[0, 100]`, rounded to two decimals.
///
/// Rises with the failure rate and the dead-letter count, falls with the share
/// of failing deliveries that eventually recovered.
pub fn risk_score(history: &ConnectorHistory) -> f64 {
    let dl = history.dead_lettered as f64;
    let raw = history.failure_rate() * FAILURE_WEIGHT
        + DEAD_LETTER_WEIGHT * dl / (dl + DEAD_LETTER_HALF_POINT)
        - history.recovery_rate() * RECOVERY_CREDIT;
    (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

/// Scored view of one connector, as reported by a recommendation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorHealth {
    pub connector_type: ConnectorType,
    pub risk_score: f64,
    pub attempts: u64,
    pub failed_attempts: u64,
    pub failure_rate: f64,
    pub dead_lettered: u64,
    pub recovered: u64,
    pub mean_recovery_ms: Option<u64>,
    pub summary: DeliverySummary,
}

impl ConnectorHealth {
    pub fn from_history(connector_type: ConnectorType, history: &ConnectorHistory) -> Self {
        Self {
            connector_type,
            risk_score: risk_score(history),
            attempts: history.attempts,
            failed_attempts: history.failed_attempts,
            failure_rate: (history.failure_rate() * 10_000.0).round() / 10_000.0,
            dead_lettered: history.dead_lettered,
            recovered: history.recovered,
            mean_recovery_ms: history.mean_recovery_ms(),
            summary: history.summary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationKind {
    ProcessQueue,
    RedriveDeadLetters,
}

impl RemediationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationKind::ProcessQueue => "process_queue",
            RemediationKind::RedriveDeadLetters => "redrive_dead_letters",
        }
    }
}

impl core::fmt::Display for RemediationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub connector_type: ConnectorType,
    pub kind: RemediationKind,
    pub risk_score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAction {
    pub action: RecommendedAction,
    pub reason: String,
    pub last_executed_at: DateTime<Utc>,
}

/// A previously executed remediation, reconstructed from the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub connector_type: ConnectorType,
    pub kind: RemediationKind,
    pub executed_at: DateTime<Utc>,
}

/// Rank candidate connectors and pick at most `max_actions` actions.
///
/// Connectors at or above `risk_threshold` qualify. A connector with backlog
/// gets `process_queue`; one with dead letters gets `redrive_dead_letters`.
/// Ties in score are broken by connector type so the order is stable.
pub fn select_actions(
    health: &[ConnectorHealth],
    risk_threshold: f64,
    max_actions: usize,
) -> Vec<RecommendedAction> {
    let mut candidates: Vec<&ConnectorHealth> = health
        .iter()
        .filter(|h| h.risk_score >= risk_threshold)
        .collect();
    candidates.sort_by(|a, b| {
        b.risk_score
            .total_cmp(&a.risk_score)
            .then(a.connector_type.cmp(&b.connector_type))
    });

    let mut actions = Vec::new();
    for h in candidates {
        let backlog = h.summary.due_now + h.summary.queued;
        if backlog > 0 {
            actions.push(RecommendedAction {
                connector_type: h.connector_type,
                kind: RemediationKind::ProcessQueue,
                risk_score: h.risk_score,
                reason: format!(
                    "risk {:.2}; {} due now, {} queued",
                    h.risk_score, h.summary.due_now, h.summary.queued
                ),
            });
        }
        if h.summary.dead_lettered > 0 {
            actions.push(RecommendedAction {
                connector_type: h.connector_type,
                kind: RemediationKind::RedriveDeadLetters,
                risk_score: h.risk_score,
                reason: format!(
                    "risk {:.2}; {} dead-lettered",
                    h.risk_score, h.summary.dead_lettered
                ),
            });
        }
    }

    actions.truncate(max_actions);
    actions
}

/// Split actions into those allowed to run and those still cooling down.
///
/// An action is suppressed when the same kind ran for the same connector
/// strictly after `now - cooldown`.
pub fn apply_cooldown(
    actions: Vec<RecommendedAction>,
    executed: &[ExecutedAction],
    cooldown: Duration,
    now: DateTime<Utc>,
) -> (Vec<RecommendedAction>, Vec<SkippedAction>) {
    let cutoff = now - cooldown;
    let mut allowed = Vec::new();
    let mut skipped = Vec::new();

    for action in actions {
        let last = executed
            .iter()
            .filter(|e| e.connector_type == action.connector_type && e.kind == action.kind)
            .map(|e| e.executed_at)
            .max();

        match last {
            Some(at) if at > cutoff => {
                let minutes = (now - at).num_minutes().max(0);
                skipped.push(SkippedAction {
                    reason: format!(
                        "{} ran for {} {minutes} minute(s) ago; cooldown is {} minute(s)",
                        action.kind,
                        action.connector_type,
                        cooldown.num_minutes()
                    ),
                    action,
                    last_executed_at: at,
                });
            }
            _ => allowed.push(action),
        }
    }

    (allowed, skipped)
}

/// Rank, drop what is cooling down, then cap. Cooling-down actions never
/// take a slot away from an eligible lower-ranked one.
pub fn plan_actions(
    health: &[ConnectorHealth],
    risk_threshold: f64,
    max_actions: usize,
    executed: &[ExecutedAction],
    cooldown: Duration,
    now: DateTime<Utc>,
) -> (Vec<RecommendedAction>, Vec<SkippedAction>) {
    let ranked = select_actions(health, risk_threshold, usize::MAX);
    let (mut allowed, skipped) = apply_cooldown(ranked, executed, cooldown, now);
    allowed.truncate(max_actions);
    (allowed, skipped)
}
