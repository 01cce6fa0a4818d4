//! Audit trail of delivery and policy actions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use conduit_core::{ActorId, ProjectId};
use conduit_delivery::{ConnectorType, ExecutedAction, RemediationKind};

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DeliveryCreated,
    DeliveryAttempted,
    QueueProcessed,
    DeadLettersRedriven,
    PolicyUpdated,
    PolicyDraftCreated,
    PolicyDraftApproved,
    PolicyDraftApplied,
    RecommendationsRun,
}

impl AuditAction {
    /// The remediation this action counts as for cooldown purposes.
    pub fn remediation(&self) -> Option<RemediationKind> {
        match self {
            AuditAction::QueueProcessed => Some(RemediationKind::ProcessQueue),
            AuditAction::DeadLettersRedriven => Some(RemediationKind::RedriveDeadLetters),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub project_id: ProjectId,
    /// `None` for actions taken by the background worker.
    pub actor: Option<ActorId>,
    pub action: AuditAction,
    pub connector_type: Option<ConnectorType>,
    pub subject_id: Option<String>,
    pub details: JsonValue,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        project_id: ProjectId,
        actor: Option<ActorId>,
        action: AuditAction,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id,
            actor,
            action,
            connector_type: None,
            subject_id: None,
            details: JsonValue::Null,
            at,
        }
    }

    pub fn connector(mut self, connector_type: ConnectorType) -> Self {
        self.connector_type = Some(connector_type);
        self
    }

    pub fn subject(mut self, subject_id: impl ToString) -> Self {
        self.subject_id = Some(subject_id.to_string());
        self
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    pub fn as_executed_action(&self) -> Option<ExecutedAction> {
        Some(ExecutedAction {
            connector_type: self.connector_type?,
            kind: self.action.remediation()?,
            executed_at: self.at,
        })
    }
}

pub trait AuditLog: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), StoreError>;

    /// Entries at or after `since`, oldest first.
    fn recent(
        &self,
        project_id: ProjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}

impl<S> AuditLog for Arc<S>
where
    S: AuditLog + ?Sized,
{
    fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        (**self).record(entry)
    }

    fn recent(
        &self,
        project_id: ProjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        (**self).recent(project_id, since)
    }
}

/// Record an entry, logging instead of failing when the log is unavailable.
pub fn record_best_effort(log: &dyn AuditLog, entry: AuditEntry) {
    let action = entry.action;
    let project_id = entry.project_id;
    if let Err(err) = log.record(entry) {
        tracing::warn!(%project_id, ?action, error = %err, "audit write failed");
    }
}

/// Longest window any reader looks back over: the maximum recommendation
/// lookback (168h) also covers the maximum cooldown (1440 min).
pub const DEFAULT_AUDIT_RETENTION_HOURS: i64 = 7 * 24;

/// Per-project in-memory log. Entries older than the retention window,
/// measured from the newest entry, are dropped on write.
#[derive(Debug)]
pub struct InMemoryAuditLog {
    entries: RwLock<HashMap<ProjectId, Vec<AuditEntry>>>,
    retention: Duration,
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self {
            entries: RwLock::default(),
            retention: Duration::hours(DEFAULT_AUDIT_RETENTION_HOURS),
        }
    }
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn len(&self, project_id: ProjectId) -> usize {
        self.entries
            .read()
            .map(|e| e.get(&project_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl AuditLog for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("audit log lock poisoned".into()))?;
        let list = entries.entry(entry.project_id).or_default();
        let horizon = entry.at - self.retention;
        list.retain(|e| e.at >= horizon);
        list.push(entry);
        Ok(())
    }

    fn recent(
        &self,
        project_id: ProjectId,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Unavailable("audit log lock poisoned".into()))?;
        let mut out: Vec<_> = entries
            .get(&project_id)
            .map(|list| list.iter().filter(|e| e.at >= since).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|e| e.at);
        Ok(out)
    }
}
