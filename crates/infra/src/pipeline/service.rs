//! Delivery service: the entry point used by the HTTP layer and the worker.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use conduit_core::{ActorId, DeliveryId, DraftId, ProjectId};
use conduit_delivery::validation::{MAX_BATCH_LIMIT, check_activate_at, check_required_approvals};
use conduit_delivery::{
    BackpressurePolicy, ConnectorDelivery, ConnectorDeliveryAttempt, ConnectorType,
    DeliverRequest, DeliveryDefaults, DeliverySummary, DispatchMode, PolicyDraft, PolicyError,
    PolicyRules, ProcessQueueParams, RecommendationParams, RedriveParams,
};

use crate::audit::{AuditAction, AuditEntry, AuditLog, InMemoryAuditLog, record_best_effort};
use crate::clock::{Clock, SystemClock};
use crate::store::{
    DeliveryFilter, DeliveryStore, InMemoryDeliveryStore, InMemoryPolicyStore, InsertOutcome,
    PolicyStore, StoreError,
};
use crate::transport::TransportRegistry;

use super::error::{ServiceError, ServiceResult};
use super::processor::{ProcessQueueReport, QueueProcessor};
use super::recommend::{RecommendationReport, RecommendationRunner};
use super::redrive::{RedriveBatcher, RedriveReport};

/// Window for advisory payload-hash duplicate detection.
const PAYLOAD_HASH_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct DeliverResult {
    pub delivery: ConnectorDelivery,
    pub attempts: Vec<ConnectorDeliveryAttempt>,
    pub duplicate: bool,
    /// A recent delivery with an identical payload, when no idempotency key was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub possible_duplicate_of: Option<DeliveryId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryDetail {
    pub delivery: ConnectorDelivery,
    pub attempts: Vec<ConnectorDeliveryAttempt>,
}

pub struct DeliveryService {
    store: Arc<dyn DeliveryStore>,
    policies: Arc<dyn PolicyStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    defaults: DeliveryDefaults,
    processor: Arc<QueueProcessor>,
    batcher: Arc<RedriveBatcher>,
    recommender: RecommendationRunner,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        policies: Arc<dyn PolicyStore>,
        transports: Arc<TransportRegistry>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let processor = Arc::new(QueueProcessor::new(
            store.clone(),
            policies.clone(),
            transports,
            audit.clone(),
            clock.clone(),
        ));
        let batcher = Arc::new(RedriveBatcher::new(store.clone(), audit.clone(), clock.clone()));
        let recommender = RecommendationRunner::new(
            store.clone(),
            audit.clone(),
            clock.clone(),
            processor.clone(),
            batcher.clone(),
        );
        Self {
            store,
            policies,
            audit,
            clock,
            defaults: DeliveryDefaults::default(),
            processor,
            batcher,
            recommender,
        }
    }

    /// Service over in-memory stores and the system clock.
    pub fn in_memory(transports: TransportRegistry) -> Self {
        Self::new(
            InMemoryDeliveryStore::arc(),
            InMemoryPolicyStore::arc(),
            Arc::new(transports),
            InMemoryAuditLog::arc(),
            Arc::new(SystemClock),
        )
    }

    pub fn with_defaults(mut self, defaults: DeliveryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate, persist and optionally dispatch one delivery.
    ///
    /// A live or delivered row with the same idempotency key is returned as a
    /// duplicate and nothing new is written.
    pub async fn deliver(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        request: DeliverRequest,
        actor: Option<ActorId>,
    ) -> ServiceResult<DeliverResult> {
        let validated = request.validate(project_id, connector_type, &self.defaults)?;
        let now = self.clock.now();

        let possible_duplicate_of = match validated.idempotency_key {
            Some(_) => None,
            None => self
                .store
                .find_by_payload_hash(
                    project_id,
                    connector_type,
                    &validated.payload_hash,
                    now - Duration::hours(PAYLOAD_HASH_WINDOW_HOURS),
                )?
                .map(|d| d.id),
        };
        if let Some(earlier) = possible_duplicate_of {
            info!(%project_id, connector = %connector_type, %earlier, "payload matches a recent delivery");
        }

        let created = match self.store.insert(ConnectorDelivery::enqueue(&validated, now))? {
            InsertOutcome::Duplicate(existing) => {
                info!(
                    %project_id,
                    connector = %connector_type,
                    delivery_id = %existing.id,
                    "duplicate idempotency key; returning existing delivery"
                );
                let attempts = self.store.attempts(project_id, existing.id)?;
                return Ok(DeliverResult {
                    delivery: existing,
                    attempts,
                    duplicate: true,
                    possible_duplicate_of: None,
                });
            }
            InsertOutcome::Created(delivery) => delivery,
        };

        debug!(%project_id, connector = %connector_type, delivery_id = %created.id, "delivery enqueued");
        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, actor, AuditAction::DeliveryCreated, now)
                .connector(connector_type)
                .subject(created.id)
                .details(json!({ "mode": validated.mode, "max_attempts": created.max_attempts })),
        );

        let delivery = match validated.mode {
            DispatchMode::Enqueue => created,
            DispatchMode::Sync => {
                match self
                    .store
                    .claim_one(project_id, created.id, now, self.processor.lease())?
                {
                    Some(claimed) => self.processor.attempt(claimed, actor).await?,
                    // A worker claimed it first; it is dispatched there.
                    None => created,
                }
            }
        };

        let attempts = self.store.attempts(project_id, delivery.id)?;
        Ok(DeliverResult {
            delivery,
            attempts,
            duplicate: false,
            possible_duplicate_of,
        })
    }

    pub async fn process_queue(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        params: ProcessQueueParams,
        actor: Option<ActorId>,
    ) -> ServiceResult<ProcessQueueReport> {
        Ok(self
            .processor
            .drain(project_id, connector_type, params, actor)
            .await?)
    }

    /// Redrive dead letters; optionally drain what was just reset.
    pub async fn redrive(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        params: RedriveParams,
        actor: Option<ActorId>,
    ) -> ServiceResult<RedriveReport> {
        let mut report = self.batcher.redrive(
            project_id,
            connector_type,
            params.limit,
            params.min_dead_letter_minutes,
            actor,
        )?;

        if params.process_after_redrive && report.redriven_count > 0 {
            let limit = (report.redriven_count as u32).min(MAX_BATCH_LIMIT);
            let processed = self
                .processor
                .drain(
                    project_id,
                    connector_type,
                    ProcessQueueParams {
                        limit,
                        backpressure: None,
                    },
                    actor,
                )
                .await?;
            report.processed = Some(processed);
        }
        Ok(report)
    }

    pub fn summarize(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
    ) -> ServiceResult<DeliverySummary> {
        Ok(self.store.summary(project_id, connector_type, self.clock.now())?)
    }

    pub fn get_delivery(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
    ) -> ServiceResult<DeliveryDetail> {
        let delivery = self
            .store
            .get(project_id, delivery_id)?
            .ok_or_else(|| ServiceError::not_found(format!("delivery {delivery_id}")))?;
        let attempts = self.store.attempts(project_id, delivery_id)?;
        Ok(DeliveryDetail { delivery, attempts })
    }

    pub fn list_deliveries(
        &self,
        project_id: ProjectId,
        filter: DeliveryFilter,
    ) -> ServiceResult<Vec<ConnectorDelivery>> {
        Ok(self.store.list(project_id, &filter)?)
    }

    pub fn get_policy(&self, project_id: ProjectId) -> ServiceResult<BackpressurePolicy> {
        self.policies
            .get_policy(project_id)?
            .ok_or_else(|| ServiceError::not_found(format!("backpressure policy for project {project_id}")))
    }

    /// Replace the project policy immediately, without the draft flow.
    pub fn put_policy(
        &self,
        project_id: ProjectId,
        rules: PolicyRules,
        actor: ActorId,
    ) -> ServiceResult<BackpressurePolicy> {
        rules.validate()?;
        let now = self.clock.now();
        let policy = BackpressurePolicy {
            project_id,
            rules,
            updated_at: now,
            updated_by: actor,
        };
        self.policies.put_policy(policy.clone())?;

        info!(%project_id, %actor, "backpressure policy updated");
        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, Some(actor), AuditAction::PolicyUpdated, now)
                .details(json!({ "source": "direct" })),
        );
        Ok(policy)
    }

    pub fn create_draft(
        &self,
        project_id: ProjectId,
        rules: PolicyRules,
        required_approvals: u32,
        activate_at: Option<DateTime<Utc>>,
        actor: ActorId,
    ) -> ServiceResult<PolicyDraft> {
        let now = self.clock.now();
        rules.validate()?;
        let required_approvals = check_required_approvals(required_approvals)?;
        let activate_at = check_activate_at(activate_at, now)?;

        let draft = PolicyDraft::new(project_id, rules, required_approvals, activate_at, actor, now);
        self.policies.insert_draft(draft.clone())?;

        info!(%project_id, draft_id = %draft.id, required_approvals, "policy draft created");
        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, Some(actor), AuditAction::PolicyDraftCreated, now)
                .subject(draft.id)
                .details(json!({ "required_approvals": required_approvals, "activate_at": activate_at })),
        );
        Ok(draft)
    }

    pub fn approve_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
        actor: ActorId,
    ) -> ServiceResult<PolicyDraft> {
        let draft = self
            .policies
            .modify_draft(project_id, draft_id, &mut |d| d.approve(actor).map_err(policy_conflict))?;

        debug!(%project_id, %draft_id, approvals = draft.approval_count(), "policy draft approved");
        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, Some(actor), AuditAction::PolicyDraftApproved, self.clock.now())
                .subject(draft_id)
                .details(json!({ "approvals": draft.approval_count() })),
        );
        Ok(draft)
    }

    /// Apply a draft once its approvals and activation time allow it.
    pub fn apply_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
        actor: ActorId,
    ) -> ServiceResult<BackpressurePolicy> {
        let now = self.clock.now();
        let mut applied = None;
        self.policies.modify_draft(project_id, draft_id, &mut |d| {
            applied = Some(d.mark_applied(actor, now).map_err(policy_conflict)?);
            Ok(())
        })?;
        let policy = applied.ok_or_else(|| ServiceError::Conflict(format!("draft {draft_id} was not applied")))?;
        self.policies.put_policy(policy.clone())?;

        info!(%project_id, %draft_id, %actor, "policy draft applied");
        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, Some(actor), AuditAction::PolicyDraftApplied, now)
                .subject(draft_id),
        );
        Ok(policy)
    }

    pub fn list_drafts(&self, project_id: ProjectId) -> ServiceResult<Vec<PolicyDraft>> {
        Ok(self.policies.list_drafts(project_id)?)
    }

    pub async fn run_recommendations(
        &self,
        project_id: ProjectId,
        params: RecommendationParams,
        actor: Option<ActorId>,
    ) -> ServiceResult<RecommendationReport> {
        Ok(self.recommender.run(project_id, params, actor).await?)
    }

    /// `(project, connector)` pairs with work due now.
    pub fn due_targets(&self) -> ServiceResult<Vec<(ProjectId, ConnectorType)>> {
        Ok(self.store.due_targets(self.clock.now())?)
    }

    /// Projects with any delivery activity inside the last `lookback_hours`.
    pub fn active_projects(&self, lookback_hours: u32) -> ServiceResult<Vec<ProjectId>> {
        let since = self.clock.now() - Duration::hours(i64::from(lookback_hours));
        Ok(self.store.active_projects(since)?)
    }

}

fn policy_conflict(err: PolicyError) -> StoreError {
    StoreError::Conflict(err.to_string())
}
