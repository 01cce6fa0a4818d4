//! Batch redrive of dead-lettered deliveries.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use conduit_core::{ActorId, ProjectId};
use conduit_delivery::{ConnectorDelivery, ConnectorType};

use crate::audit::{AuditAction, AuditEntry, AuditLog, record_best_effort};
use crate::clock::Clock;
use crate::store::{DeliveryStore, StoreError};

use super::processor::ProcessQueueReport;

#[derive(Debug, Clone, Serialize)]
pub struct RedriveReport {
    pub redriven_count: usize,
    pub deliveries: Vec<ConnectorDelivery>,
    /// Present when the redrive was followed by a drain pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<ProcessQueueReport>,
}

/// Moves dead letters back to `queued`. It never dispatches by itself.
pub struct RedriveBatcher {
    store: Arc<dyn DeliveryStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl RedriveBatcher {
    pub fn new(store: Arc<dyn DeliveryStore>, audit: Arc<dyn AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self { store, audit, clock }
    }

    /// Reset up to `limit` deliveries dead-lettered at least
    /// `min_dead_letter_minutes` ago, oldest first.
    ///
    /// A delivery that changed underneath us (already redriven elsewhere) is
    /// skipped; an unavailable store aborts the batch.
    pub fn redrive(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        limit: u32,
        min_dead_letter_minutes: u32,
        actor: Option<ActorId>,
    ) -> Result<RedriveReport, StoreError> {
        let now = self.clock.now();
        let cutoff = now - Duration::minutes(i64::from(min_dead_letter_minutes));
        let candidates =
            self.store
                .dead_lettered_before(project_id, connector_type, cutoff, limit as usize)?;

        let mut deliveries = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.store.reset_for_redrive(project_id, candidate.id, now) {
                Ok(reset) => deliveries.push(reset),
                Err(err) if err.is_unavailable() => return Err(err),
                Err(err) => {
                    warn!(delivery_id = %candidate.id, error = %err, "redrive skipped");
                }
            }
        }

        if !deliveries.is_empty() {
            info!(%project_id, connector = %connector_type, count = deliveries.len(), "dead letters redriven");
        }

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(project_id, actor, AuditAction::DeadLettersRedriven, now)
                .connector(connector_type)
                .details(json!({
                    "redriven_count": deliveries.len(),
                    "limit": limit,
                    "min_dead_letter_minutes": min_dead_letter_minutes,
                })),
        );

        Ok(RedriveReport {
            redriven_count: deliveries.len(),
            deliveries,
            processed: None,
        })
    }
}
