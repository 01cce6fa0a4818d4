//! Boundary validation.
//!
//! Raw requests come in as loosely-typed JSON and leave as typed values or a
//! list of field errors. Everything past this module only sees validated input.

use chrono::{DateTime, Utc};
use http::HeaderName;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use url::Url;

use conduit_core::ProjectId;

use crate::backpressure::BackpressureConfig;
use crate::connector::{
    ConnectorTarget, ConnectorType, DbSinkTarget, JiraTarget, SlackTarget, SqsTarget,
    WebhookTarget, default_sink_table,
};
use crate::delivery::{DeliveryDefaults, payload_hash};

pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;
pub const MAX_CONFIG_BYTES: usize = 16 * 1024;
pub const MAX_IDEMPOTENCY_KEY_CHARS: usize = 200;
pub const MAX_ATTEMPTS_CEILING: u32 = 10;
pub const MIN_INITIAL_BACKOFF_MS: u64 = 100;
pub const MAX_INITIAL_BACKOFF_MS: u64 = 60_000;
pub const MAX_BATCH_LIMIT: u32 = 100;
pub const DEFAULT_BATCH_LIMIT: u32 = 25;

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// All field errors found in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{}", render(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

fn render(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError::new(field, message)],
        }
    }

    fn check(errors: Vec<FieldError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self { errors })
        }
    }
}

/// Parse a connector type coming from a path segment or query string.
pub fn parse_connector_type(raw: &str) -> Result<ConnectorType, ValidationErrors> {
    raw.parse::<ConnectorType>()
        .map_err(|e| ValidationErrors::single("connector_type", e.to_string()))
}

/// Whether to attempt once inline or only enqueue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Sync,
    #[default]
    Enqueue,
}

/// Raw `deliver` request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliverRequest {
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default)]
    pub config: Option<JsonValue>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub mode: Option<DispatchMode>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub initial_backoff_ms: Option<u64>,
}

/// A delivery request that passed every boundary check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDelivery {
    pub project_id: ProjectId,
    pub connector_type: ConnectorType,
    pub payload: JsonValue,
    pub payload_hash: String,
    pub target: ConnectorTarget,
    pub idempotency_key: Option<String>,
    pub mode: DispatchMode,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl DeliverRequest {
    pub fn validate(
        self,
        project_id: ProjectId,
        connector_type: ConnectorType,
        defaults: &DeliveryDefaults,
    ) -> Result<ValidatedDelivery, ValidationErrors> {
        let mut errors = Vec::new();

        if self.payload.is_null() {
            errors.push(FieldError::new("payload", "is required"));
        }
        let payload_bytes = self.payload.to_string().len();
        if payload_bytes > MAX_PAYLOAD_BYTES {
            errors.push(FieldError::new(
                "payload",
                format!("is {payload_bytes} bytes; the limit is {MAX_PAYLOAD_BYTES}"),
            ));
        }

        let target = match parse_target(connector_type, self.config.as_ref()) {
            Ok(target) => Some(target),
            Err(mut errs) => {
                errors.append(&mut errs);
                None
            }
        };

        let idempotency_key = match self.idempotency_key.map(|k| k.trim().to_string()) {
            Some(k) if k.is_empty() => {
                errors.push(FieldError::new("idempotency_key", "must not be blank"));
                None
            }
            Some(k) if k.chars().count() > MAX_IDEMPOTENCY_KEY_CHARS => {
                errors.push(FieldError::new(
                    "idempotency_key",
                    format!("must be at most {MAX_IDEMPOTENCY_KEY_CHARS} characters"),
                ));
                None
            }
            other => other,
        };

        let max_attempts = self.max_attempts.unwrap_or(defaults.max_attempts);
        if !(1..=MAX_ATTEMPTS_CEILING).contains(&max_attempts) {
            errors.push(FieldError::new(
                "max_attempts",
                format!("must be between 1 and {MAX_ATTEMPTS_CEILING}"),
            ));
        }

        let initial_backoff_ms = self.initial_backoff_ms.unwrap_or(defaults.initial_backoff_ms);
        if !(MIN_INITIAL_BACKOFF_MS..=MAX_INITIAL_BACKOFF_MS).contains(&initial_backoff_ms) {
            errors.push(FieldError::new(
                "initial_backoff_ms",
                format!("must be between {MIN_INITIAL_BACKOFF_MS} and {MAX_INITIAL_BACKOFF_MS}"),
            ));
        }

        ValidationErrors::check(errors)?;

        let Some(target) = target else {
            return Err(ValidationErrors::single("config", "is invalid"));
        };

        Ok(ValidatedDelivery {
            project_id,
            connector_type,
            payload_hash: payload_hash(&self.payload),
            payload: self.payload,
            target,
            idempotency_key,
            mode: self.mode.unwrap_or_default(),
            max_attempts,
            initial_backoff_ms,
        })
    }
}

/// Turn connector config JSON into the typed target for `connector_type`.
pub fn parse_target(
    connector_type: ConnectorType,
    config: Option<&JsonValue>,
) -> Result<ConnectorTarget, Vec<FieldError>> {
    let config = match config {
        Some(JsonValue::Null) | None => {
            if connector_type == ConnectorType::DbSink {
                return Ok(ConnectorTarget::DbSink(DbSinkTarget {
                    table: default_sink_table(),
                }));
            }
            return Err(vec![FieldError::new(
                "config",
                format!("is required for {connector_type} connectors"),
            )]);
        }
        Some(config) => config,
    };

    let config_bytes = config.to_string().len();
    if config_bytes > MAX_CONFIG_BYTES {
        return Err(vec![FieldError::new(
            "config",
            format!("is {config_bytes} bytes; the limit is {MAX_CONFIG_BYTES}"),
        )]);
    }

    fn decode<T: serde::de::DeserializeOwned>(config: &JsonValue) -> Result<T, Vec<FieldError>> {
        serde_json::from_value(config.clone())
            .map_err(|e| vec![FieldError::new("config", e.to_string())])
    }

    let mut errors = Vec::new();
    let target = match connector_type {
        ConnectorType::Webhook => {
            let t: WebhookTarget = decode(config)?;
            check_url("config.url", &t.url, &mut errors);
            for name in t.headers.keys() {
                if HeaderName::from_bytes(name.as_bytes()).is_err() {
                    errors.push(FieldError::new(
                        "config.headers",
                        format!("invalid header name '{name}'"),
                    ));
                }
            }
            ConnectorTarget::Webhook(t)
        }
        ConnectorType::Slack => {
            let t: SlackTarget = decode(config)?;
            check_url("config.webhook_url", &t.webhook_url, &mut errors);
            ConnectorTarget::Slack(t)
        }
        ConnectorType::Jira => {
            let t: JiraTarget = decode(config)?;
            check_url("config.base_url", &t.base_url, &mut errors);
            if t.project_key.is_empty()
                || !t.project_key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            {
                errors.push(FieldError::new(
                    "config.project_key",
                    "must be uppercase letters and digits",
                ));
            }
            if !t.email.contains('@') {
                errors.push(FieldError::new("config.email", "must be an email address"));
            }
            if t.api_token.trim().is_empty() {
                errors.push(FieldError::new("config.api_token", "is required"));
            }
            ConnectorTarget::Jira(t)
        }
        ConnectorType::Sqs => {
            let t: SqsTarget = decode(config)?;
            check_url("config.queue_url", &t.queue_url, &mut errors);
            ConnectorTarget::Sqs(t)
        }
        ConnectorType::DbSink => {
            let t: DbSinkTarget = decode(config)?;
            if !is_sql_identifier(&t.table) {
                errors.push(FieldError::new(
                    "config.table",
                    "must be a plain identifier, optionally schema-qualified",
                ));
            }
            ConnectorTarget::DbSink(t)
        }
    };

    if errors.is_empty() {
        Ok(target)
    } else {
        Err(errors)
    }
}

fn check_url(field: &str, raw: &str, errors: &mut Vec<FieldError>) {
    let ok = Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false);
    if !ok {
        errors.push(FieldError::new(field, "must be an absolute http(s) URL"));
    }
}

/// `table` or `schema.table`, each part `[A-Za-z_][A-Za-z0-9_]{0,62}`.
pub fn is_sql_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        part.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn check_limit(field: &str, value: u32, errors: &mut Vec<FieldError>) {
    if !(1..=MAX_BATCH_LIMIT).contains(&value) {
        errors.push(FieldError::new(field, format!("must be between 1 and {MAX_BATCH_LIMIT}")));
    }
}

/// Raw queue-drain request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessQueueRequest {
    #[serde(default)]
    pub limit: Option<u32>,
    /// Request-level override; wins over any stored policy.
    #[serde(default)]
    pub backpressure: Option<BackpressureConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessQueueParams {
    pub limit: u32,
    pub backpressure: Option<BackpressureConfig>,
}

impl ProcessQueueRequest {
    pub fn validate(self) -> Result<ProcessQueueParams, ValidationErrors> {
        let mut errors = Vec::new();
        let limit = self.limit.unwrap_or(DEFAULT_BATCH_LIMIT);
        check_limit("limit", limit, &mut errors);
        if let Some(cfg) = &self.backpressure {
            errors.extend(cfg.validate("backpressure"));
        }
        ValidationErrors::check(errors)?;
        Ok(ProcessQueueParams {
            limit,
            backpressure: self.backpressure,
        })
    }
}

pub const DEFAULT_MIN_DEAD_LETTER_MINUTES: u32 = 15;
pub const MAX_MIN_DEAD_LETTER_MINUTES: u32 = 7 * 24 * 60;

/// Raw redrive request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedriveRequest {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub min_dead_letter_minutes: Option<u32>,
    #[serde(default)]
    pub process_after_redrive: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedriveParams {
    pub limit: u32,
    pub min_dead_letter_minutes: u32,
    pub process_after_redrive: bool,
}

impl RedriveRequest {
    pub fn validate(self) -> Result<RedriveParams, ValidationErrors> {
        let mut errors = Vec::new();
        let limit = self.limit.unwrap_or(DEFAULT_BATCH_LIMIT);
        check_limit("limit", limit, &mut errors);
        let min_dead_letter_minutes = self
            .min_dead_letter_minutes
            .unwrap_or(DEFAULT_MIN_DEAD_LETTER_MINUTES);
        if min_dead_letter_minutes > MAX_MIN_DEAD_LETTER_MINUTES {
            errors.push(FieldError::new(
                "min_dead_letter_minutes",
                format!("must be at most {MAX_MIN_DEAD_LETTER_MINUTES}"),
            ));
        }
        ValidationErrors::check(errors)?;
        Ok(RedriveParams {
            limit,
            min_dead_letter_minutes,
            process_after_redrive: self.process_after_redrive.unwrap_or(false),
        })
    }
}

/// Raw recommendation-run request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub lookback_hours: Option<u32>,
    #[serde(default)]
    pub risk_threshold: Option<f64>,
    #[serde(default)]
    pub max_actions: Option<u32>,
    #[serde(default)]
    pub cooldown_minutes: Option<u32>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommendationParams {
    pub lookback_hours: u32,
    pub risk_threshold: f64,
    pub max_actions: u32,
    pub cooldown_minutes: u32,
    pub dry_run: bool,
}

impl Default for RecommendationParams {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            risk_threshold: 50.0,
            max_actions: 3,
            cooldown_minutes: 30,
            dry_run: false,
        }
    }
}

impl RecommendationRequest {
    pub fn validate(self) -> Result<RecommendationParams, ValidationErrors> {
        let defaults = RecommendationParams::default();
        let params = RecommendationParams {
            lookback_hours: self.lookback_hours.unwrap_or(defaults.lookback_hours),
            risk_threshold: self.risk_threshold.unwrap_or(defaults.risk_threshold),
            max_actions: self.max_actions.unwrap_or(defaults.max_actions),
            cooldown_minutes: self.cooldown_minutes.unwrap_or(defaults.cooldown_minutes),
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
        };

        let mut errors = Vec::new();
        if !(1..=168).contains(&params.lookback_hours) {
            errors.push(FieldError::new("lookback_hours", "must be between 1 and 168"));
        }
        if !(params.risk_threshold.is_finite() && (0.0..=100.0).contains(&params.risk_threshold)) {
            errors.push(FieldError::new("risk_threshold", "must be between 0 and 100"));
        }
        if !(1..=20).contains(&params.max_actions) {
            errors.push(FieldError::new("max_actions", "must be between 1 and 20"));
        }
        if params.cooldown_minutes > 1_440 {
            errors.push(FieldError::new("cooldown_minutes", "must be at most 1440"));
        }
        ValidationErrors::check(errors)?;
        Ok(params)
    }
}

pub fn check_required_approvals(required: u32) -> Result<u32, ValidationErrors> {
    if required > 5 {
        return Err(ValidationErrors::single(
            "required_approvals",
            "must be between 0 and 5",
        ));
    }
    Ok(required)
}

/// Drafts may not be scheduled further out than a year.
pub fn check_activate_at(
    activate_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ValidationErrors> {
    match activate_at {
        Some(at) if at > now + chrono::Duration::days(365) => Err(ValidationErrors::single(
            "activate_at",
            "must be within one year",
        )),
        other => Ok(other),
    }
}
