//! In-memory stores for tests/dev.
//!
//! A single `RwLock` per table set gives the same atomicity the trait
//! promises: every method runs under one lock acquisition.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};

use conduit_core::{DeliveryId, DraftId, ProjectId};
use conduit_delivery::{
    BackpressurePolicy, ConnectorDelivery, ConnectorDeliveryAttempt, ConnectorType,
    DeliveryStatus, DeliverySummary, DraftStatus, NewAttempt, PolicyDraft,
};

use super::r#trait::{DeliveryFilter, DeliveryStore, InsertOutcome, PolicyStore, StoreError};

#[derive(Debug, Default)]
struct DeliveryTables {
    deliveries: HashMap<DeliveryId, ConnectorDelivery>,
    attempts: HashMap<DeliveryId, Vec<ConnectorDeliveryAttempt>>,
}

/// In-memory delivery + attempt store.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    inner: RwLock<DeliveryTables>,
    offline: AtomicBool,
    failing_records: AtomicUsize,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `record_attempt` fail with
    /// `StoreError::Unavailable`; everything else keeps working.
    pub fn fail_next_records(&self, count: usize) {
        self.failing_records.store(count, Ordering::SeqCst);
    }

    fn take_record_failure(&self) -> bool {
        self.failing_records
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DeliveryTables>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delivery store is offline".into()));
        }
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("delivery store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DeliveryTables>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("delivery store is offline".into()));
        }
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("delivery store lock poisoned".into()))
    }
}

fn due_order(a: &ConnectorDelivery, b: &ConnectorDelivery) -> std::cmp::Ordering {
    a.next_attempt_at
        .cmp(&b.next_attempt_at)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

impl DeliveryStore for InMemoryDeliveryStore {
    fn insert(&self, delivery: ConnectorDelivery) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.write()?;

        if let Some(key) = delivery.idempotency_key.as_deref() {
            let existing = tables.deliveries.values().find(|d| {
                d.project_id == delivery.project_id
                    && d.connector_type == delivery.connector_type
                    && d.idempotency_key.as_deref() == Some(key)
                    && d.status != DeliveryStatus::DeadLettered
            });
            if let Some(existing) = existing {
                return Ok(InsertOutcome::Duplicate(existing.clone()));
            }
        }

        if tables.deliveries.contains_key(&delivery.id) {
            return Err(StoreError::Conflict(format!("delivery {} already exists", delivery.id)));
        }
        tables.attempts.insert(delivery.id, Vec::new());
        tables.deliveries.insert(delivery.id, delivery.clone());
        Ok(InsertOutcome::Created(delivery))
    }

    fn get(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
    ) -> Result<Option<ConnectorDelivery>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .deliveries
            .get(&delivery_id)
            .filter(|d| d.project_id == project_id)
            .cloned())
    }

    fn list(
        &self,
        project_id: ProjectId,
        filter: &DeliveryFilter,
    ) -> Result<Vec<ConnectorDelivery>, StoreError> {
        let tables = self.read()?;
        let mut out: Vec<_> = tables
            .deliveries
            .values()
            .filter(|d| {
                d.project_id == project_id
                    && filter.connector_type.is_none_or(|ct| d.connector_type == ct)
                    && filter.status.is_none_or(|s| d.status == s)
            })
            .cloned()
            .collect();

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(filter.limit);
        Ok(out)
    }

    fn claim_due(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<ConnectorDelivery>, StoreError> {
        let mut tables = self.write()?;

        let mut due: Vec<&ConnectorDelivery> = tables
            .deliveries
            .values()
            .filter(|d| {
                d.project_id == project_id && d.connector_type == connector_type && d.is_due(now)
            })
            .collect();
        due.sort_by(|a, b| due_order(a, b));
        let ids: Vec<DeliveryId> = due.iter().take(limit).map(|d| d.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(d) = tables.deliveries.get_mut(&id) {
                d.next_attempt_at = Some(now + lease);
                claimed.push(d.clone());
            }
        }
        Ok(claimed)
    }

    fn claim_one(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<ConnectorDelivery>, StoreError> {
        let mut tables = self.write()?;
        match tables.deliveries.get_mut(&delivery_id) {
            Some(d) if d.project_id == project_id && d.is_due(now) => {
                d.next_attempt_at = Some(now + lease);
                Ok(Some(d.clone()))
            }
            _ => Ok(None),
        }
    }

    fn record_attempt(
        &self,
        delivery: &ConnectorDelivery,
        attempt: NewAttempt,
    ) -> Result<ConnectorDeliveryAttempt, StoreError> {
        if self.take_record_failure() {
            return Err(StoreError::Unavailable("delivery store write failed".into()));
        }
        let mut tables = self.write()?;

        let stored = tables
            .deliveries
            .get(&delivery.id)
            .filter(|d| d.project_id == delivery.project_id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery {}", delivery.id)))?;
        if !stored.status.is_pending() {
            return Err(StoreError::Conflict(format!(
                "delivery {} is already {}",
                delivery.id, stored.status
            )));
        }
        delivery
            .check_invariants()
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        let history = tables.attempts.entry(delivery.id).or_default();
        let number = history.last().map_or(1, |a| a.attempt_number + 1);
        let record = ConnectorDeliveryAttempt::from_new(delivery, number, attempt);
        history.push(record.clone());

        tables.deliveries.insert(delivery.id, delivery.clone());
        Ok(record)
    }

    fn attempts(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
    ) -> Result<Vec<ConnectorDeliveryAttempt>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .attempts
            .get(&delivery_id)
            .map(|list| {
                list.iter()
                    .filter(|a| a.project_id == project_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn attempts_since(
        &self,
        project_id: ProjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<ConnectorDeliveryAttempt>, StoreError> {
        let tables = self.read()?;
        let mut out: Vec<_> = tables
            .attempts
            .values()
            .flatten()
            .filter(|a| a.project_id == project_id && a.created_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.delivery_id.cmp(&b.delivery_id))
                .then(a.attempt_number.cmp(&b.attempt_number))
        });
        Ok(out)
    }

    fn dead_lettered_before(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConnectorDelivery>, StoreError> {
        let tables = self.read()?;
        let mut out: Vec<_> = tables
            .deliveries
            .values()
            .filter(|d| {
                d.project_id == project_id
                    && d.connector_type == connector_type
                    && d.status == DeliveryStatus::DeadLettered
                    && d.updated_at <= cutoff
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        out.truncate(limit);
        Ok(out)
    }

    fn reset_for_redrive(
        &self,
        project_id: ProjectId,
        delivery_id: DeliveryId,
        now: DateTime<Utc>,
    ) -> Result<ConnectorDelivery, StoreError> {
        let mut tables = self.write()?;
        let d = tables
            .deliveries
            .get_mut(&delivery_id)
            .filter(|d| d.project_id == project_id)
            .ok_or_else(|| StoreError::NotFound(format!("delivery {delivery_id}")))?;
        conduit_delivery::redrive(d, now).map_err(|e| StoreError::Conflict(e.to_string()))?;
        Ok(d.clone())
    }

    fn release_claims(
        &self,
        project_id: ProjectId,
        delivery_ids: &[DeliveryId],
        leased_until: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tables = self.write()?;
        let mut released = 0;
        for id in delivery_ids {
            if let Some(d) = tables.deliveries.get_mut(id).filter(|d| {
                d.project_id == project_id
                    && d.status.is_pending()
                    && d.next_attempt_at == Some(leased_until)
            }) {
                d.next_attempt_at = Some(due_at);
                released += 1;
            }
        }
        Ok(released)
    }

    fn summary(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        now: DateTime<Utc>,
    ) -> Result<DeliverySummary, StoreError> {
        let tables = self.read()?;
        let mut s = DeliverySummary::default();
        for d in tables
            .deliveries
            .values()
            .filter(|d| d.project_id == project_id && d.connector_type == connector_type)
        {
            match d.status {
                DeliveryStatus::Queued => s.queued += 1,
                DeliveryStatus::Retrying => s.retrying += 1,
                DeliveryStatus::Delivered => s.delivered += 1,
                DeliveryStatus::DeadLettered => s.dead_lettered += 1,
            }
            if d.is_due(now) {
                s.due_now += 1;
            }
        }
        Ok(s)
    }

    fn due_targets(&self, now: DateTime<Utc>) -> Result<Vec<(ProjectId, ConnectorType)>, StoreError> {
        let tables = self.read()?;
        let targets: BTreeSet<_> = tables
            .deliveries
            .values()
            .filter(|d| d.is_due(now))
            .map(|d| (d.project_id, d.connector_type))
            .collect();
        Ok(targets.into_iter().collect())
    }

    fn active_projects(&self, since: DateTime<Utc>) -> Result<Vec<ProjectId>, StoreError> {
        let tables = self.read()?;
        let projects: BTreeSet<_> = tables
            .deliveries
            .values()
            .filter(|d| d.updated_at >= since)
            .map(|d| d.project_id)
            .collect();
        Ok(projects.into_iter().collect())
    }

    fn find_by_payload_hash(
        &self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        payload_hash: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ConnectorDelivery>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .deliveries
            .values()
            .filter(|d| {
                d.project_id == project_id
                    && d.connector_type == connector_type
                    && d.payload_hash == payload_hash
                    && d.created_at >= since
            })
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }
}

/// In-memory policy + draft store.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<ProjectId, BackpressurePolicy>>,
    drafts: RwLock<HashMap<DraftId, PolicyDraft>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("policy store lock poisoned".into())
}

impl PolicyStore for InMemoryPolicyStore {
    fn get_policy(&self, project_id: ProjectId) -> Result<Option<BackpressurePolicy>, StoreError> {
        Ok(self.policies.read().map_err(poisoned)?.get(&project_id).cloned())
    }

    fn put_policy(&self, policy: BackpressurePolicy) -> Result<(), StoreError> {
        self.policies
            .write()
            .map_err(poisoned)?
            .insert(policy.project_id, policy);
        Ok(())
    }

    fn insert_draft(&self, draft: PolicyDraft) -> Result<(), StoreError> {
        let mut drafts = self.drafts.write().map_err(poisoned)?;
        if drafts.contains_key(&draft.id) {
            return Err(StoreError::Conflict(format!("draft {} already exists", draft.id)));
        }
        drafts.insert(draft.id, draft);
        Ok(())
    }

    fn get_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
    ) -> Result<Option<PolicyDraft>, StoreError> {
        Ok(self
            .drafts
            .read()
            .map_err(poisoned)?
            .get(&draft_id)
            .filter(|d| d.project_id == project_id)
            .cloned())
    }

    fn modify_draft(
        &self,
        project_id: ProjectId,
        draft_id: DraftId,
        change: &mut dyn FnMut(&mut PolicyDraft) -> Result<(), StoreError>,
    ) -> Result<PolicyDraft, StoreError> {
        let mut drafts = self.drafts.write().map_err(poisoned)?;
        let stored = drafts
            .get_mut(&draft_id)
            .filter(|d| d.project_id == project_id)
            .ok_or_else(|| StoreError::NotFound(format!("policy draft {draft_id}")))?;
        if stored.status == DraftStatus::Applied {
            return Err(StoreError::Conflict(format!("draft {draft_id} was already applied")));
        }
        let mut working = stored.clone();
        change(&mut working)?;
        *stored = working.clone();
        Ok(working)
    }

    fn list_drafts(&self, project_id: ProjectId) -> Result<Vec<PolicyDraft>, StoreError> {
        let mut out: Vec<_> = self
            .drafts
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_delivery::{
        BackoffPolicy, ConnectorTarget, DispatchMode, TransportOutcome, ValidatedDelivery,
        WebhookTarget, apply_outcome, payload_hash,
    };
    use serde_json::json;

    fn delivery(project_id: ProjectId, key: Option<&str>, now: DateTime<Utc>) -> ConnectorDelivery {
        let payload = json!({"event": "workflow.completed"});
        let req = ValidatedDelivery {
            project_id,
            connector_type: ConnectorType::Webhook,
            payload_hash: payload_hash(&payload),
            payload,
            target: ConnectorTarget::Webhook(WebhookTarget {
                url: "https://hooks.example.com".to_string(),
                headers: Default::default(),
            }),
            idempotency_key: key.map(str::to_string),
            mode: DispatchMode::Enqueue,
            max_attempts: 2,
            initial_backoff_ms: 1_000,
        };
        ConnectorDelivery::enqueue(&req, now)
    }

    fn fail(store: &InMemoryDeliveryStore, d: &mut ConnectorDelivery, now: DateTime<Utc>) {
        let backoff = BackoffPolicy::new(1_000).without_jitter();
        let attempt =
            apply_outcome(d, &TransportOutcome::failed(Some(500), "boom"), &backoff, now).unwrap();
        store.record_attempt(d, attempt).unwrap();
    }

    #[test]
    fn idempotency_key_deduplicates_live_rows() {
        let store = InMemoryDeliveryStore::new();
        let project = ProjectId::new();
        let now = Utc::now();

        let first = match store.insert(delivery(project, Some("k1"), now)).unwrap() {
            InsertOutcome::Created(d) => d,
            other => panic!("expected created, got {other:?}"),
        };
        match store.insert(delivery(project, Some("k1"), now)).unwrap() {
            InsertOutcome::Duplicate(d) => assert_eq!(d.id, first.id),
            other => panic!("expected duplicate, got {other:?}"),
        }

        // Other projects are isolated.
        assert!(matches!(
            store.insert(delivery(ProjectId::new(), Some("k1"), now)).unwrap(),
            InsertOutcome::Created(_)
        ));
    }

    #[test]
    fn dead_lettered_row_does_not_block_new_insert() {
        let store = InMemoryDeliveryStore::new();
        let project = ProjectId::new();
        let now = Utc::now();

        let InsertOutcome::Created(mut d) = store.insert(delivery(project, Some("k"), now)).unwrap()
        else {
            panic!("expected created");
        };
        fail(&store, &mut d, now);
        fail(&store, &mut d, now);
        assert_eq!(d.status, DeliveryStatus::DeadLettered);

        assert!(matches!(
            store.insert(delivery(project, Some("k"), now)).unwrap(),
            InsertOutcome::Created(_)
        ));
    }

    #[test]
    fn claim_due_orders_and_leases() {
        let store = InMemoryDeliveryStore::new();
        let project = ProjectId::new();
        let now = Utc::now();

        let late = delivery(project, None, now);
        let early = delivery(project, None, now - Duration::seconds(30));
        store.insert(late.clone()).unwrap();
        store.insert(early.clone()).unwrap();

        let lease = Duration::seconds(60);
        let claimed = store
            .claim_due(project, ConnectorType::Webhook, 10, now, lease)
            .unwrap();
        let ids: Vec<_> = claimed.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        // Leased rows are invisible to a second claimer until the lease expires.
        assert!(store
            .claim_due(project, ConnectorType::Webhook, 10, now, lease)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .claim_due(project, ConnectorType::Webhook, 10, now + lease, lease)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn attempt_numbers_stay_contiguous_across_redrive() {
        let store = InMemoryDeliveryStore::new();
        let project = ProjectId::new();
        let now = Utc::now();

        let InsertOutcome::Created(mut d) = store.insert(delivery(project, None, now)).unwrap()
        else {
            panic!("expected created");
        };
        fail(&store, &mut d, now);
        fail(&store, &mut d, now);

        let mut d = store.reset_for_redrive(project, d.id, now).unwrap();
        assert_eq!(d.status, DeliveryStatus::Queued);
        assert_eq!(d.attempt_count, 0);
        fail(&store, &mut d, now);

        let numbers: Vec<u32> = store
            .attempts(project, d.id)
            .unwrap()
            .iter()
            .map(|a| a.attempt_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn record_attempt_rejects_finalized_delivery() {
        let store = InMemoryDeliveryStore::new();
        let project = ProjectId::new();
        let now = Utc::now();

        let InsertOutcome::Created(mut d) = store.insert(delivery(project, None, now)).unwrap()
        else {
            panic!("expected created");
        };
        let stale = d.clone();
        let backoff = BackoffPolicy::new(1_000);
        let a = apply_outcome(&mut d, &TransportOutcome::succeeded(Some(200), None), &backoff, now)
            .unwrap();
        store.record_attempt(&d, a).unwrap();

        let mut stale = stale;
        let a = apply_outcome(&mut stale, &TransportOutcome::succeeded(Some(200), None), &backoff, now)
            .unwrap();
        assert!(matches!(store.record_attempt(&stale, a), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn released_claims_are_due_again() {
        let store = InMemoryDeliveryStore::new();
        let project = ProjectId::new();
        let now = Utc::now();
        let lease = Duration::seconds(40);
        store.insert(delivery(project, None, now)).unwrap();
        store.insert(delivery(project, None, now)).unwrap();

        let claimed = store.claim_due(project, ConnectorType::Webhook, 10, now, lease).unwrap();
        let ids: Vec<_> = claimed.iter().map(|d| d.id).collect();
        assert_eq!(store.summary(project, ConnectorType::Webhook, now).unwrap().due_now, 0);

        // A lease that is no longer current releases nothing.
        let stale = now + Duration::seconds(5);
        assert_eq!(store.release_claims(project, &ids, stale, now).unwrap(), 0);

        assert_eq!(store.release_claims(project, &ids, now + lease, now).unwrap(), 2);
        assert_eq!(store.summary(project, ConnectorType::Webhook, now).unwrap().due_now, 2);
    }

    #[test]
    fn summary_counts_due_now() {
        let store = InMemoryDeliveryStore::new();
        let project = ProjectId::new();
        let now = Utc::now();
        store.insert(delivery(project, None, now)).unwrap();
        store.insert(delivery(project, None, now + Duration::minutes(5))).unwrap();

        let s = store.summary(project, ConnectorType::Webhook, now).unwrap();
        assert_eq!(s.queued, 2);
        assert_eq!(s.due_now, 1);
    }

    #[test]
    fn offline_store_is_unavailable() {
        let store = InMemoryDeliveryStore::new();
        store.set_offline(true);
        let err = store.summary(ProjectId::new(), ConnectorType::Sqs, Utc::now()).unwrap_err();
        assert!(err.is_unavailable());
    }

    fn stored_draft(store: &InMemoryPolicyStore, required_approvals: u32) -> PolicyDraft {
        let draft = PolicyDraft::new(
            ProjectId::new(),
            Default::default(),
            required_approvals,
            None,
            conduit_core::ActorId::new(),
            Utc::now(),
        );
        store.insert_draft(draft.clone()).unwrap();
        draft
    }

    fn conflict(e: conduit_delivery::PolicyError) -> StoreError {
        StoreError::Conflict(e.to_string())
    }

    #[test]
    fn applied_draft_cannot_be_modified() {
        let store = InMemoryPolicyStore::new();
        let draft = stored_draft(&store, 0);
        let now = Utc::now();
        store
            .modify_draft(draft.project_id, draft.id, &mut |d| {
                d.mark_applied(conduit_core::ActorId::new(), now).map(|_| ()).map_err(conflict)
            })
            .unwrap();

        let err = store
            .modify_draft(draft.project_id, draft.id, &mut |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn failed_change_writes_nothing() {
        let store = InMemoryPolicyStore::new();
        let draft = stored_draft(&store, 1);
        let err = store
            .modify_draft(draft.project_id, draft.id, &mut |d| {
                d.approvals.push(conduit_core::ActorId::new());
                Err(StoreError::Conflict("rejected".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let stored = store.get_draft(draft.project_id, draft.id).unwrap().unwrap();
        assert!(stored.approvals.is_empty());
    }

    #[test]
    fn concurrent_approvals_are_all_kept() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let draft = stored_draft(&store, 8);
        let (project, draft_id) = (draft.project_id, draft.id);
        let approvers: Vec<_> = (0..8).map(|_| conduit_core::ActorId::new()).collect();

        let handles: Vec<_> = approvers
            .iter()
            .copied()
            .map(|actor| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .modify_draft(project, draft_id, &mut |d| d.approve(actor).map_err(conflict))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stored = store.get_draft(project, draft_id).unwrap().unwrap();
        assert_eq!(stored.approvals.len(), approvers.len());
        assert!(approvers.iter().all(|a| stored.approvals.contains(a)));
    }
}
