//! `conduit-delivery`: the connector delivery domain.
//!
//! Pure decision logic for outbound connector deliveries: the delivery state
//! machine, retry backoff, backpressure resolution, backpressure policy drafts,
//! request validation and reliability scoring. Nothing in this crate performs
//! IO; stores, transports and clocks are supplied by `conduit-infra`.

pub mod backoff;
pub mod backpressure;
pub mod connector;
pub mod delivery;
pub mod policy;
pub mod reliability;
pub mod transition;
pub mod validation;

pub use backoff::BackoffPolicy;
pub use backpressure::{
    BackpressureConfig, BackpressureDecision, DeliverySummary, ThrottleReason, resolve_limit,
};
pub use connector::{
    ConnectorTarget, ConnectorType, DbSinkTarget, JiraTarget, SlackTarget, SqsTarget,
    WebhookTarget,
};
pub use delivery::{
    ConnectorDelivery, ConnectorDeliveryAttempt, DeliveryDefaults, DeliveryStatus, NewAttempt,
    payload_hash,
};
pub use policy::{
    BackpressurePolicy, DraftStatus, PolicyDraft, PolicyError, PolicyRules, effective_config,
};
pub use reliability::{
    ConnectorHealth, ConnectorHistory, ExecutedAction, RecommendedAction, RemediationKind,
    SkippedAction, apply_cooldown, plan_actions, risk_score, select_actions,
};
pub use transition::{TransportOutcome, apply_outcome, redrive};
pub use validation::{
    DeliverRequest, DispatchMode, FieldError, ProcessQueueParams, ProcessQueueRequest,
    RecommendationParams, RecommendationRequest, RedriveParams, RedriveRequest,
    ValidatedDelivery, ValidationErrors,
};
