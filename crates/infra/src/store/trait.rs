use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use conduit_core::{DeliveryId, DraftId, ProjectId};
use conduit_delivery::{
    BackpressurePolicy, ConnectorDelivery, ConnectorDeliveryAttempt, ConnectorType,
    DeliveryStatus, DeliverySummary, NewAttempt, PolicyDraft,
};

/// Storage failure.
///
/// `Unavailable` aborts a batch; `NotFound` and `Conflict` concern a single
/// record and are handled per item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(ConnectorDelivery),
    /// A live or delivered row with the same idempotency key already exists.
    Duplicate(ConnectorDelivery),
}

/// Filter for delivery listings; newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryFilter {
    pub connector_type: Option<ConnectorType>,
    pub status: Option<DeliveryStatus>,
    pub limit: usize,
}

/// Durable storage of deliveries and their attempts.
///
/// Every method is atomic with respect to the records it touches.
pub trait DeliveryStore: Send + Sync {
    /// Insert a new delivery, deduplicating on
    /// `(project_id, connector_type, idempotency_key)` against rows that are
    /// queued, retrying or delivered.
    fn insert(&self, delivery: ConnectorDelivery) -> Result<InsertOutcome, StoreError>;

    fn get(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
    ) -> Result<Option<ConnectorDelivery>, StoreError>;

    fn list(
        &self,
        project_id: ProjectId,
        filter: &DeliveryFilter,
    ) -> Result<Vec<ConnectorDelivery>, StoreError>;

    /// Select up to `limit` due deliveries, oldest-due first (ties by
    /// `created_at`, then id), and push their `next_attempt_at` to
    /// `now + lease` in the same step.
    fn claim_due(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<ConnectorDelivery>, StoreError>;

    /// Claim one specific delivery if it is due.
    fn claim_one(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<ConnectorDelivery>, StoreError>;

    /// Persist the post-transition delivery and append its attempt.
    ///
    /// The attempt number is assigned here: one past the highest number
    /// already stored for the delivery.
    fn record_attempt(
        &self,
        delivery: &ConnectorDelivery,
        attempt: NewAttempt,
    ) -> Result<ConnectorDeliveryAttempt, StoreError>;

    fn attempts(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
    ) -> Result<Vec<ConnectorDeliveryAttempt>, StoreError>;

    /// Attempts created at or after `since`, oldest first.
    fn attempts_since(
        &self,
        project_id: ProjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ConnectorDeliveryAttempt>, StoreError>;

    /// Dead-lettered deliveries last updated at or before `cutoff`, oldest first.
    fn dead_lettered_before(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConnectorDelivery>, StoreError>;

    /// Apply the redrive reset if the delivery is still dead-lettered.
    fn reset_for_redrive(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<ConnectorDelivery, StoreError>;

    /// Undo claims that were never attempted: deliveries still holding the
    /// lease ending at `leased_until` become due at `due_at` again.
    fn release_claims(
        &self,
        project_id: ProjectId,
        delivery_ids: &[DeliveryId],
        leased_until: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    fn summary(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        now: DateTime<Utc>,
    ) -> Result<DeliverySummary, StoreError>;

    /// Distinct (project, connector) pairs with at least one due delivery.
    fn due_targets(&self, now: DateTime<Utc>) -> Result<Vec<(ProjectId, ConnectorType)>, StoreError>;

    /// Projects with any delivery updated at or after `since`.
    fn active_projects(&self, since: DateTime<Utc>) -> Result<Vec<ProjectId>, StoreError>;

    /// Most recent delivery with the same payload hash created at or after `since`.
    fn find_by_payload_hash(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        payload_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ConnectorDelivery>, StoreError>;
}

impl<S> DeliveryStore for Arc<S>
where
    S: DeliveryStore + ?Sized,
{
    fn insert(&self, delivery: ConnectorDelivery) -> Result<InsertOutcome, StoreError> {
        (**self).insert(delivery)
    }

    fn get(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
    ) -> Result<Option<ConnectorDelivery>, StoreError> {
        (**self).get(project_id, delivery_id)
    }

    fn list(
        &self,
        project_id: ProjectId,
        filter: &DeliveryFilter,
    ) -> Result<Vec<ConnectorDelivery>, StoreError> {
        (**self).list(project_id, filter)
    }

    fn claim_due(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<ConnectorDelivery>, StoreError> {
        (**self).claim_due(project_id, connector_type, limit, now, lease)
    }

    fn claim_one(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<ConnectorDelivery>, StoreError> {
        (**self).claim_one(project_id, delivery_id, now, lease)
    }

    fn record_attempt(
        &self,
        delivery: &ConnectorDelivery,
        attempt: NewAttempt,
    ) -> Result<ConnectorDeliveryAttempt, StoreError> {
        (**self).record_attempt(delivery, attempt)
    }

    fn attempts(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
    ) -> Result<Vec<ConnectorDeliveryAttempt>, StoreError> {
        (**self).attempts(project_id, delivery_id)
    }

    fn attempts_since(
        &self,
        project_id: ProjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ConnectorDeliveryAttempt>, StoreError> {
        (**self).attempts_since(project_id, since)
    }

    fn dead_lettered_before(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConnectorDelivery>, StoreError> {
        (**self).dead_lettered_before(project_id, connector_type, cutoff, limit)
    }

    fn reset_for_redrive(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<ConnectorDelivery, StoreError> {
        (**self).reset_for_redrive(project_id, delivery_id, now)
    }

    fn release_claims(
        &self,
        project_id: ProjectId,
        delivery_ids: &[DeliveryId],
        leased_until: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        (**self).release_claims(project_id, delivery_ids, leased_until, due_at)
    }

    fn summary(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        now: DateTime<Utc>,
    ) -> Result<DeliverySummary, StoreError> {
        (**self).summary(project_id, connector_type, now)
    }

    fn due_targets(&self, now: DateTime<Utc>) -> Result<Vec<(ProjectId, ConnectorType)>, StoreError> {
        (**self).due_targets(now)
    }

    fn active_projects(&self, since: DateTime<Utc>) -> Result<Vec<ProjectId>, StoreError> {
        (**self).active_projects(since)
    }

    fn find_by_payload_hash(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        payload_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ConnectorDelivery>, StoreError> {
        (**self).find_by_payload_hash(project_id, connector_type, payload_hash, since)
    }
}

/// Storage of the active backpressure policy and its drafts.
pub trait PolicyStore: Send + Sync {
    fn get_policy(&self, project_id: ProjectId) -> Result<Option<BackpressurePolicy>, StoreError>;

    fn put_policy(&self, policy: BackpressurePolicy) -> Result<(), StoreError>;

    fn insert_draft(&self, draft: PolicyDraft) -> Result<(), StoreError>;

    fn get_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
    ) -> Result<Option<PolicyDraft>, StoreError>;

    /// Run `change` against the stored draft while holding the store's write
    /// lock. Nothing is written when `change` fails. Returns the stored copy.
    fn modify_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
        change: &mut dyn FnMut(&mut PolicyDraft) -> Result<(), StoreError>,
    ) -> Result<PolicyDraft, StoreError>;

    /// Drafts of a project, newest first.
    fn list_drafts(&self, project_id: ProjectId) -> Result<Vec<PolicyDraft>, StoreError>;
}

impl<S> PolicyStore for Arc<S>
where
    S: PolicyStore + ?Sized,
{
    fn get_policy(&self, project_id: ProjectId) -> Result<Option<BackpressurePolicy>, StoreError> {
        (**self).get_policy(project_id)
    }

    fn put_policy(&self, policy: BackpressurePolicy) -> Result<(), StoreError> {
        (**self).put_policy(policy)
    }

    fn insert_draft(&self, draft: PolicyDraft) -> Result<(), StoreError> {
        (**self).insert_draft(draft)
    }

    fn get_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
    ) -> Result<Option<PolicyDraft>, StoreError> {
        (**self).get_draft(project_id, draft_id)
    }

    fn modify_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
        change: &mut dyn FnMut(&mut PolicyDraft) -> Result<(), StoreError>,
    ) -> Result<PolicyDraft, StoreError> {
        (**self).modify_draft(project_id, draft_id, change)
    }

    fn list_drafts(&self, project_id: ProjectId) -> Result<Vec<PolicyDraft>, StoreError> {
        (**self).list_drafts(project_id)
    }
}
