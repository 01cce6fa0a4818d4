//! Risk-based automated remediation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use conduit_core::{ActorId, DeliveryId, ProjectId};
use conduit_delivery::validation::{DEFAULT_BATCH_LIMIT, DEFAULT_MIN_DEAD_LETTER_MINUTES};
use conduit_delivery::{
    ConnectorDeliveryAttempt, ConnectorHealth, ConnectorHistory, ConnectorType, DeliveryStatus,
    ProcessQueueParams, RecommendationParams, RecommendedAction, RemediationKind, SkippedAction,
    plan_actions,
};

use crate::audit::{AuditAction, AuditEntry, AuditLog, record_best_effort};
use crate::clock::Clock;
use crate::store::{DeliveryFilter, DeliveryStore, StoreError};

use super::processor::QueueProcessor;
use super::redrive::RedriveBatcher;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    Processed { processed_count: usize, throttled: bool },
    Redriven { redriven_count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub connector_type: ConnectorType,
    pub kind: RemediationKind,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationReport {
    pub dry_run: bool,
    pub connectors: Vec<ConnectorHealth>,
    pub selected_actions: Vec<RecommendedAction>,
    pub skipped_actions: Vec<SkippedAction>,
    pub action_results: Vec<ActionResult>,
}

/// Fold attempt history into per-connector counts.
///
/// A delivery counts as recovered when a success follows at least one failed
/// attempt inside the window; recovery time runs from that first failure.
pub(crate) fn fold_attempts(
    attempts: &[ConnectorDeliveryAttempt],
) -> BTreeMap<ConnectorType, ConnectorHistory> {
    let mut histories: BTreeMap<ConnectorType, ConnectorHistory> = BTreeMap::new();
    let mut by_delivery: HashMap<DeliveryId, Vec<&ConnectorDeliveryAttempt>> = HashMap::new();

    for a in attempts {
        let h = histories.entry(a.connector_type).or_default();
        h.attempts += 1;
        if !a.success {
            h.failed_attempts += 1;
        }
        by_delivery.entry(a.delivery_id).or_default().push(a);
    }

    for list in by_delivery.values_mut() {
        list.sort_by_key(|a| a.attempt_number);
        let Some(first_failure) = list.iter().find(|a| !a.success) else {
            continue;
        };
        let recovery = list
            .iter()
            .find(|a| a.success && a.attempt_number > first_failure.attempt_number);
        if let Some(success) = recovery {
            let h = histories.entry(success.connector_type).or_default();
            h.recovered += 1;
            h.total_recovery_ms += (success.created_at - first_failure.created_at)
                .num_milliseconds()
                .max(0) as u64;
        }
    }

    histories
}

pub struct RecommendationRunner {
    store: Arc<dyn DeliveryStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    processor: Arc<QueueProcessor>,
    batcher: Arc<RedriveBatcher>,
}

impl RecommendationRunner {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        processor: Arc<QueueProcessor>,
        batcher: Arc<RedriveBatcher>,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            processor,
            batcher,
        }
    }

    /// Score every connector with activity in the lookback window.
    pub fn score(
        &self,
        project_id: ProjectId,
        lookback_hours: u32,
    ) -> Result<Vec<ConnectorHealth>, StoreError> {
        let now = self.clock.now();
        let since = now - Duration::hours(i64::from(lookback_hours));

        let attempts = self.store.attempts_since(project_id, since)?;
        let mut histories = fold_attempts(&attempts);

        let mut health = Vec::new();
        for connector_type in ConnectorType::ALL {
            let summary = self.store.summary(project_id, connector_type, now)?;
            let dead_lettered = self
                .store
                .list(
                    project_id,
                    &DeliveryFilter {
                        connector_type: Some(connector_type),
                        status: Some(DeliveryStatus::DeadLettered),
                        limit: usize::MAX,
                    },
                )?
                .iter()
                .filter(|d| d.updated_at >= since)
                .count() as u64;

            let mut history = histories.remove(&connector_type).unwrap_or_default();
            history.dead_lettered = dead_lettered;
            history.summary = summary;

            let has_activity = history.attempts > 0
                || summary.queued + summary.retrying + summary.dead_lettered > 0;
            if has_activity {
                health.push(ConnectorHealth::from_history(connector_type, &history));
            }
        }
        Ok(health)
    }

    pub async fn run(
        &self,
        project_id: ProjectId,
        params: RecommendationParams,
        actor: Option<ActorId>,
    ) -> Result<RecommendationReport, StoreError> {
        let connectors = self.score(project_id, params.lookback_hours)?;

        let now = self.clock.now();
        let cooldown = Duration::minutes(i64::from(params.cooldown_minutes));
        let executed: Vec<_> = self
            .audit
            .recent(project_id, now - cooldown)?
            .iter()
            .filter_map(|e| e.as_executed_action())
            .collect();
        let (selected_actions, skipped_actions) = plan_actions(
            &connectors,
            params.risk_threshold,
            params.max_actions as usize,
            &executed,
            cooldown,
            now,
        );

        let mut action_results = Vec::new();
        if !params.dry_run {
            for action in &selected_actions {
                let outcome = match action.kind {
                    RemediationKind::ProcessQueue => {
                        let report = self
                            .processor
                            .drain(
                                project_id,
                                action.connector_type,
                                ProcessQueueParams {
                                    limit: DEFAULT_BATCH_LIMIT,
                                    backpressure: None,
                                },
                                actor,
                            )
                            .await?;
                        ActionOutcome::Processed {
                            processed_count: report.processed_count,
                            throttled: report.backpressure.throttled,
                        }
                    }
                    RemediationKind::RedriveDeadLetters => {
                        let report = self.batcher.redrive(
                            project_id,
                            action.connector_type,
                            DEFAULT_BATCH_LIMIT,
                            DEFAULT_MIN_DEAD_LETTER_MINUTES,
                            actor,
                        )?;
                        ActionOutcome::Redriven {
                            redriven_count: report.redriven_count,
                        }
                    }
                };
                action_results.push(ActionResult {
                    connector_type: action.connector_type,
                    kind: action.kind,
                    outcome,
                });
            }
        }

        info!(
            %project_id,
            selected = selected_actions.len(),
            skipped = skipped_actions.len(),
            dry_run = params.dry_run,
            "recommendations evaluated"
        );

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, actor, AuditAction::RecommendationsRun, now).details(json!({
                "dry_run": params.dry_run,
                "selected": selected_actions.len(),
                "skipped": skipped_actions.len(),
                "risk_threshold": params.risk_threshold,
            })),
        );

        Ok(RecommendationReport {
            dry_run: params.dry_run,
            connectors,
            selected_actions,
            skipped_actions,
            action_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryDeliveryStore, InMemoryPolicyStore, InsertOutcome};
    use crate::test_support::validated;
    use crate::transport::{ScriptedTransport, TransportRegistry};
    use chrono::Utc;
    use conduit_core::AttemptId;
    use conduit_delivery::ConnectorDelivery;

    fn attempt(
        delivery_id: DeliveryId,
        number: u32,
        success: bool,
        at: chrono::DateTime<Utc>,
    ) -> ConnectorDeliveryAttempt {
        ConnectorDeliveryAttempt {
            id: AttemptId::new(),
            delivery_id,
            project_id: ProjectId::new(),
            connector_type: ConnectorType::Webhook,
            attempt_number: number,
            success,
            status_code: Some(if success { 200 } else { 500 }),
            error_message: None,
            response_body: None,
            duration_ms: 5,
            created_at: at,
        }
    }

    #[test]
    fn fold_counts_failures_and_recoveries() {
        let t0 = Utc::now();
        let recovered = DeliveryId::new();
        let clean = DeliveryId::new();
        let attempts = vec![
            attempt(recovered, 1, false, t0),
            attempt(recovered, 2, false, t0 + Duration::seconds(1)),
            attempt(recovered, 3, true, t0 + Duration::seconds(4)),
            attempt(clean, 1, true, t0),
        ];

        let h = fold_attempts(&attempts)[&ConnectorType::Webhook];
        assert_eq!(h.attempts, 4);
        assert_eq!(h.failed_attempts, 2);
        assert_eq!(h.recovered, 1);
        assert_eq!(h.mean_recovery_ms(), Some(4_000));
    }

    struct Fixture {
        store: Arc<InMemoryDeliveryStore>,
        audit: Arc<InMemoryAuditLog>,
        clock: Arc<ManualClock>,
        runner: RecommendationRunner,
    }

    fn fixture(transport: ScriptedTransport) -> Fixture {
        let store = InMemoryDeliveryStore::arc();
        let audit = InMemoryAuditLog::arc();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = Arc::new(TransportRegistry::new(std::time::Duration::from_secs(1)).with(transport));
        let processor = Arc::new(QueueProcessor::new(
            store.clone(),
            InMemoryPolicyStore::arc(),
            registry,
            audit.clone(),
            clock.clone(),
        ));
        let batcher = Arc::new(RedriveBatcher::new(store.clone(), audit.clone(), clock.clone()));
        let runner = RecommendationRunner::new(store.clone(), audit.clone(), clock.clone(), processor, batcher);
        Fixture {
            store,
            audit,
            clock,
            runner,
        }
    }

    fn enqueue(f: &Fixture, project: ProjectId, ct: ConnectorType, max_attempts: u32) {
        let d = ConnectorDelivery::enqueue(&validated(project, ct, max_attempts), f.clock.now());
        assert!(matches!(f.store.insert(d).unwrap(), InsertOutcome::Created(_)));
    }

    /// Two failed attempts on a webhook delivery, leaving it retrying and due.
    async fn degrade(f: &Fixture, project: ProjectId) {
        enqueue(f, project, ConnectorType::Webhook, 5);
        for _ in 0..2 {
            f.runner
                .processor
                .drain(
                    project,
                    ConnectorType::Webhook,
                    ProcessQueueParams { limit: 10, backpressure: None },
                    None,
                )
                .await
                .unwrap();
            f.clock.advance(Duration::minutes(1));
        }
    }

    #[tokio::test]
    async fn dry_run_selects_without_executing() {
        let f = fixture(ScriptedTransport::failing(ConnectorType::Webhook, 500));
        let project = ProjectId::new();
        degrade(&f, project).await;
        // Let the drain entries age out of the cooldown window.
        f.clock.advance(Duration::hours(1));

        let params = RecommendationParams { dry_run: true, ..Default::default() };
        let report = f.runner.run(project, params, None).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.selected_actions.len(), 1);
        assert_eq!(report.selected_actions[0].kind, RemediationKind::ProcessQueue);
        assert!(report.action_results.is_empty());
        assert!(report.connectors[0].risk_score >= 50.0);
    }

    #[tokio::test]
    async fn recent_drain_puts_action_in_cooldown() {
        let f = fixture(ScriptedTransport::failing(ConnectorType::Webhook, 500));
        let project = ProjectId::new();
        degrade(&f, project).await;

        // The last drain ran one minute ago.
        let params = RecommendationParams { cooldown_minutes: 10, ..Default::default() };
        let report = f.runner.run(project, params, None).await.unwrap();

        assert!(report.selected_actions.is_empty());
        assert_eq!(report.skipped_actions.len(), 1);
        assert_eq!(report.skipped_actions[0].action.connector_type, ConnectorType::Webhook);
        assert_eq!(report.skipped_actions[0].action.kind, RemediationKind::ProcessQueue);
    }

    #[tokio::test]
    async fn executes_selected_actions() {
        let f = fixture(ScriptedTransport::failing(ConnectorType::Webhook, 500));
        let project = ProjectId::new();
        degrade(&f, project).await;
        f.clock.advance(Duration::hours(1));

        let report = f.runner.run(project, RecommendationParams::default(), None).await.unwrap();
        assert_eq!(report.action_results.len(), 1);
        assert!(matches!(
            report.action_results[0].outcome,
            ActionOutcome::Processed { processed_count: 1, .. }
        ));

        let run_logged = f
            .audit
            .recent(project, f.clock.now() - Duration::minutes(1))
            .unwrap()
            .iter()
            .any(|e| e.action == AuditAction::RecommendationsRun);
        assert!(run_logged);
    }

    #[tokio::test]
    async fn healthy_connectors_yield_no_actions() {
        let f = fixture(ScriptedTransport::new(ConnectorType::Webhook));
        let project = ProjectId::new();
        degrade(&f, project).await;

        let report = f.runner.run(project, RecommendationParams::default(), None).await.unwrap();
        assert!(report.selected_actions.is_empty());
        assert!(report.skipped_actions.is_empty());
        assert_eq!(report.connectors[0].risk_score, 0.0);
    }
}
