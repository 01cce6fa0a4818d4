use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use conduit_core::{DeliveryId, ProjectId};
use conduit_delivery::{
    BackpressureDecision, ConnectorDelivery, ConnectorDeliveryAttempt, ConnectorTarget,
    ConnectorType, DeliveryStatus, DeliverySummary, PolicyRules,
};
use conduit_infra::pipeline::{DeliverResult, DeliveryDetail, ProcessQueueReport, RedriveReport};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListDeliveriesQuery {
    pub connector_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDraftRequest {
    #[serde(flatten)]
    pub rules: PolicyRules,
    #[serde(default)]
    pub required_approvals: u32,
    #[serde(default)]
    pub activate_at: Option<DateTime<Utc>>,
}

// -------------------------
// Response DTOs
// -------------------------

const REDACTED: &str = "***";

/// Connector config as returned to callers: credentials and header values are masked.
pub fn target_view(target: &ConnectorTarget) -> JsonValue {
    match target {
        ConnectorTarget::Webhook(t) => {
            let headers: serde_json::Map<String, JsonValue> = t
                .headers
                .keys()
                .map(|k| (k.clone(), JsonValue::from(REDACTED)))
                .collect();
            json!({ "url": t.url, "headers": headers })
        }
        ConnectorTarget::Slack(t) => json!({ "webhook_url": t.webhook_url, "channel": t.channel }),
        ConnectorTarget::Jira(t) => json!({
            "base_url": t.base_url,
            "project_key": t.project_key,
            "issue_type": t.issue_type,
            "email": t.email,
            "api_token": REDACTED,
        }),
        ConnectorTarget::Sqs(t) => json!({ "queue_url": t.queue_url }),
        ConnectorTarget::DbSink(t) => json!({ "table": t.table }),
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryView {
    pub id: DeliveryId,
    pub project_id: ProjectId,
    pub connector_type: ConnectorType,
    pub status: DeliveryStatus,
    pub idempotency_key: Option<String>,
    pub payload_hash: String,
    pub payload: JsonValue,
    pub target: JsonValue,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub last_status_code: Option<u16>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub dead_letter_reason: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ConnectorDelivery> for DeliveryView {
    fn from(d: ConnectorDelivery) -> Self {
        Self {
            target: target_view(&d.target),
            id: d.id,
            project_id: d.project_id,
            connector_type: d.connector_type,
            status: d.status,
            idempotency_key: d.idempotency_key,
            payload_hash: d.payload_hash,
            payload: d.payload,
            attempt_count: d.attempt_count,
            max_attempts: d.max_attempts,
            initial_backoff_ms: d.initial_backoff_ms,
            last_status_code: d.last_status_code,
            last_error: d.last_error,
            next_attempt_at: d.next_attempt_at,
            dead_letter_reason: d.dead_letter_reason,
            delivered_at: d.delivered_at,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

pub fn delivery_views(deliveries: Vec<ConnectorDelivery>) -> Vec<DeliveryView> {
    deliveries.into_iter().map(DeliveryView::from).collect()
}

#[derive(Debug, Serialize)]
pub struct DeliverResponse {
    pub delivery: DeliveryView,
    pub attempts: Vec<ConnectorDeliveryAttempt>,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub possible_duplicate_of: Option<DeliveryId>,
}

impl From<DeliverResult> for DeliverResponse {
    fn from(r: DeliverResult) -> Self {
        Self {
            delivery: r.delivery.into(),
            attempts: r.attempts,
            duplicate: r.duplicate,
            possible_duplicate_of: r.possible_duplicate_of,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryDetailResponse {
    pub delivery: DeliveryView,
    pub attempts: Vec<ConnectorDeliveryAttempt>,
}

impl From<DeliveryDetail> for DeliveryDetailResponse {
    fn from(d: DeliveryDetail) -> Self {
        Self {
            delivery: d.delivery.into(),
            attempts: d.attempts,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProcessQueueResponse {
    pub processed_count: usize,
    pub deliveries: Vec<DeliveryView>,
    pub backpressure: BackpressureDecision,
    pub summary: DeliverySummary,
    pub skipped_count: usize,
}

impl From<ProcessQueueReport> for ProcessQueueResponse {
    fn from(r: ProcessQueueReport) -> Self {
        Self {
            processed_count: r.processed_count,
            deliveries: delivery_views(r.deliveries),
            backpressure: r.backpressure,
            summary: r.summary,
            skipped_count: r.skipped_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RedriveResponse {
    pub redriven_count: usize,
    pub deliveries: Vec<DeliveryView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<ProcessQueueResponse>,
}

impl From<RedriveReport> for RedriveResponse {
    fn from(r: RedriveReport) -> Self {
        Self {
            redriven_count: r.redriven_count,
            deliveries: delivery_views(r.deliveries),
            processed: r.processed.map(ProcessQueueResponse::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_delivery::{JiraTarget, WebhookTarget};

    #[test]
    fn secrets_never_leave_the_api() {
        let jira = ConnectorTarget::Jira(JiraTarget {
            base_url: "https://acme.atlassian.net".into(),
            project_key: "OPS".into(),
            issue_type: "Bug".into(),
            email: "bot@acme.io".into(),
            api_token: "s3cret".into(),
        });
        let view = target_view(&jira);
        assert_eq!(view["api_token"], REDACTED);
        assert!(!view.to_string().contains("s3cret"));

        let webhook = ConnectorTarget::Webhook(WebhookTarget {
            url: "https://hooks.acme.io/x".into(),
            headers: [("Authorization".to_string(), "Bearer abc".to_string())].into(),
        });
        let view = target_view(&webhook);
        assert_eq!(view["headers"]["Authorization"], REDACTED);
    }
}
