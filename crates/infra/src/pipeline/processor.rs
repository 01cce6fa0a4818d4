//! Queue drain: claim due deliveries, send them, record outcomes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use conduit_core::{ActorId, DeliveryId, ProjectId};
use conduit_delivery::{
    BackoffPolicy, BackpressureDecision, ConnectorDelivery, ConnectorType, DeliveryStatus,
    DeliverySummary, ProcessQueueParams, apply_outcome, effective_config, resolve_limit,
};

use crate::audit::{AuditAction, AuditEntry, AuditLog, record_best_effort};
use crate::clock::Clock;
use crate::store::{DeliveryStore, PolicyStore, StoreError};
use crate::transport::TransportRegistry;

/// Result of one drain pass.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessQueueReport {
    pub processed_count: usize,
    pub deliveries: Vec<ConnectorDelivery>,
    pub backpressure: BackpressureDecision,
    /// Queue counts the backpressure decision was based on.
    pub summary: DeliverySummary,
    /// Claimed deliveries whose outcome could not be recorded.
    pub skipped_count: usize,
}

/// Drains due deliveries for one project + connector.
pub struct QueueProcessor {
    store: Arc<dyn DeliveryStore>,
    policies: Arc<dyn PolicyStore>,
    transports: Arc<TransportRegistry>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        policies: Arc<dyn PolicyStore>,
        transports: Arc<TransportRegistry>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        // A claimed delivery stays invisible for one full transport timeout plus slack.
        let lease = Duration::from_std(transports.timeout()).unwrap_or_default() + Duration::seconds(30);
        Self {
            store,
            policies,
            transports,
            audit,
            clock,
            lease,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Resolve backpressure, then drain up to the effective limit.
    ///
    /// Transport failures are absorbed into the state machine. A per-item
    /// `NotFound`/`Conflict` skips that item; `Unavailable` aborts the pass.
    pub async fn drain(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        params: ProcessQueueParams,
        actor: Option<ActorId>,
    ) -> Result<ProcessQueueReport, StoreError> {
        let now = self.clock.now();
        let summary = self.store.summary(project_id, connector_type, now)?;
        let policy = self.policies.get_policy(project_id)?;
        let config = effective_config(params.backpressure.as_ref(), policy.as_ref(), connector_type);
        let decision = resolve_limit(params.limit, &summary, config.as_ref());

        if decision.throttled {
            info!(
                %project_id,
                connector = %connector_type,
                requested = decision.requested_limit,
                effective = decision.effective_limit,
                reason = decision.reason.map(|r| r.as_str()),
                "queue drain throttled"
            );
        }

        let claimed = self.store.claim_due(
            project_id,
            connector_type,
            decision.effective_limit as usize,
            now,
            self.lease,
        )?;

        let leased_until = now + self.lease;
        let mut deliveries = Vec::with_capacity(claimed.len());
        let mut skipped_count = 0;
        let mut pending = claimed.into_iter();
        while let Some(delivery) = pending.next() {
            match self.attempt(delivery, actor).await {
                Ok(updated) => deliveries.push(updated),
                Err(err) if err.is_unavailable() => {
                    error!(%project_id, connector = %connector_type, error = %err, "store unavailable; aborting drain");
                    let untouched: Vec<_> = pending.map(|d| d.id).collect();
                    self.release_untouched(project_id, &untouched, leased_until, now);
                    return Err(err);
                }
                Err(err) => {
                    warn!(%project_id, connector = %connector_type, error = %err, "skipping delivery");
                    skipped_count += 1;
                }
            }
        }

        let report = ProcessQueueReport {
            processed_count: deliveries.len(),
            deliveries,
            backpressure: decision,
            summary,
            skipped_count,
        };

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, actor, AuditAction::QueueProcessed, self.clock.now())
                .connector(connector_type)
                .details(json!({
                    "processed_count": report.processed_count,
                    "skipped_count": report.skipped_count,
                    "requested_limit": decision.requested_limit,
                    "effective_limit": decision.effective_limit,
                    "throttled": decision.throttled,
                })),
        );

        debug!(%project_id, connector = %connector_type, processed = report.processed_count, "queue drain finished");
        Ok(report)
    }

    /// Hand unattempted claims back so the next pass can pick them up. The
    /// store may still be down; the lease then expires on its own.
    fn release_untouched(
        &self,
        project_id: ProjectId,
        ids: &[DeliveryId],
        leased_until: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) {
        if ids.is_empty() {
            return;
        }
        match self.store.release_claims(project_id, ids, leased_until, due_at) {
            Ok(released) => debug!(%project_id, released, "released unattempted claims"),
            Err(err) => warn!(
                %project_id,
                unreleased = ids.len(),
                error = %err,
                "could not release claims; they become due when the lease expires"
            ),
        }
    }

    /// Send one already-claimed delivery and persist the transition.
    pub async fn attempt(
        &self,
        mut delivery: ConnectorDelivery,
        actor: Option<ActorId>,
    ) -> Result<ConnectorDelivery, StoreError> {
        let outcome = self.transports.dispatch(&delivery).await;
        let now = self.clock.now();
        let backoff = BackoffPolicy::for_delivery(&delivery);

        let attempt = apply_outcome(&mut delivery, &outcome, &backoff, now)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        let record = self.store.record_attempt(&delivery, attempt)?;

        if delivery.status == DeliveryStatus::DeadLettered {
            warn!(
                delivery_id = %delivery.id,
                project_id = %delivery.project_id,
                connector = %delivery.connector_type,
                reason = delivery.dead_letter_reason.as_deref().unwrap_or_default(),
                "delivery dead-lettered"
            );
        }

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(delivery.project_id, actor, AuditAction::DeliveryAttempted, now)
                .connector(delivery.connector_type)
                .subject(delivery.id)
                .details(json!({
                    "attempt_number": record.attempt_number,
                    "success": record.success,
                    "status_code": record.status_code,
                    "status": delivery.status,
                })),
        );

        Ok(delivery)
    }
}
