//! Stored backpressure policy and approval-gated policy drafts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conduit_core::{ActorId, DraftId, ProjectId};

use crate::backpressure::BackpressureConfig;
use crate::connector::ConnectorType;
use crate::validation::ValidationErrors;

pub const MAX_REQUIRED_APPROVALS: u32 = 5;

/// Project-wide backpressure thresholds plus per-connector overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRules {
    #[serde(default)]
    pub default: BackpressureConfig,
    #[serde(default)]
    pub connector_overrides: BTreeMap<ConnectorType, BackpressureConfig>,
}

impl PolicyRules {
    pub fn config_for(&self, connector: ConnectorType) -> BackpressureConfig {
        self.connector_overrides
            .get(&connector)
            .copied()
            .unwrap_or(self.default)
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = self.default.validate("default");
        for (connector, cfg) in &self.connector_overrides {
            errors.extend(cfg.validate(&format!("connector_overrides.{connector}")));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { errors })
        }
    }
}

/// The active policy of one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressurePolicy {
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub rules: PolicyRules,
    pub updated_at: DateTime<Utc>,
    pub updated_by: ActorId,
}

/// Resolve the backpressure config for one drain pass.
///
/// A request-supplied config wins over the stored policy; inside the stored
/// policy a connector override wins over the project default.
pub fn effective_config(
    request_override: Option<&BackpressureConfig>,
    policy: Option<&BackpressurePolicy>,
    connector: ConnectorType,
) -> Option<BackpressureConfig> {
    request_override
        .copied()
        .or_else(|| policy.map(|p| p.rules.config_for(connector)))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("draft {0} was already applied")]
    AlreadyApplied(DraftId),

    #[error("the author of a draft cannot approve it")]
    SelfApproval,

    #[error("actor {0} already approved this draft")]
    DuplicateApproval(ActorId),

    #[error("draft needs {required} approval(s), has {have}")]
    ApprovalsMissing { required: u32, have: u32 },

    #[error("draft activates at {0}")]
    NotYetActive(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Applied,
}

/// A proposed policy that becomes active only through [`PolicyDraft::mark_applied`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDraft {
    pub id: DraftId,
    pub project_id: ProjectId,
    pub rules: PolicyRules,
    pub required_approvals: u32,
    pub approvals: Vec<ActorId>,
    pub activate_at: Option<DateTime<Utc>>,
    pub status: DraftStatus,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub applied_by: Option<ActorId>,
}

impl PolicyDraft {
    pub fn new(
        project_id: ProjectId,
        rules: PolicyRules,
        required_approvals: u32,
        activate_at: Option<DateTime<Utc>>,
        created_by: ActorId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DraftId::new(),
            project_id,
            rules,
            required_approvals,
            approvals: Vec::new(),
            activate_at,
            status: DraftStatus::Pending,
            created_by,
            created_at: now,
            applied_at: None,
            applied_by: None,
        }
    }

    pub fn approval_count(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn approve(&mut self, approver: ActorId) -> Result<(), PolicyError> {
        if self.status == DraftStatus::Applied {
            return Err(PolicyError::AlreadyApplied(self.id));
        }
        if approver == self.created_by {
            return Err(PolicyError::SelfApproval);
        }
        if self.approvals.contains(&approver) {
            return Err(PolicyError::DuplicateApproval(approver));
        }
        self.approvals.push(approver);
        Ok(())
    }

    /// Whether the draft may be applied at `now`.
    pub fn check_applicable(&self, now: DateTime<Utc>) -> Result<(), PolicyError> {
        if self.status == DraftStatus::Applied {
            return Err(PolicyError::AlreadyApplied(self.id));
        }
        if self.approval_count() < self.required_approvals {
            return Err(PolicyError::ApprovalsMissing {
                required: self.required_approvals,
                have: self.approval_count(),
            });
        }
        if let Some(at) = self.activate_at.filter(|at| *at > now) {
            return Err(PolicyError::NotYetActive(at));
        }
        Ok(())
    }

    /// Mark the draft applied and return the policy it produces.
    pub fn mark_applied(
        &mut self,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<BackpressurePolicy, PolicyError> {
        self.check_applicable(now)?;
        self.status = DraftStatus::Applied;
        self.applied_at = Some(now);
        self.applied_by = Some(actor);
        Ok(self.to_policy(actor, now))
    }

    pub fn to_policy(&self, actor: ActorId, now: DateTime<Utc>) -> BackpressurePolicy {
        BackpressurePolicy {
            project_id: self.project_id,
            rules: self.rules.clone(),
            updated_at: now,
            updated_by: actor,
        }
    }
}
