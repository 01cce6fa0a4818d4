//! HTTP-based transports: webhook, Slack, Jira and SQS.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use conduit_delivery::{ConnectorDelivery, ConnectorTarget, ConnectorType, TransportOutcome};

use super::{
    ConnectorTransport, IDEMPOTENCY_HEADER, MAX_RESPONSE_BODY_BYTES, target_mismatch, truncate_body,
};

/// Turn a finished HTTP exchange into an outcome; 2xx is success.
async fn outcome_from(result: Result<reqwest::Response, reqwest::Error>) -> TransportOutcome {
    let response = match result {
        Ok(response) => response,
        Err(err) => return request_error(err),
    };

    let status = response.status();
    let body = read_capped(response, MAX_RESPONSE_BODY_BYTES).await;
    if status.is_success() {
        TransportOutcome::succeeded(Some(status.as_u16()), body)
    } else {
        let reason = status.canonical_reason().unwrap_or("unexpected status");
        TransportOutcome::failed(Some(status.as_u16()), reason).with_response_body(body)
    }
}

/// Read at most `max` bytes of the body; the rest is never pulled off the wire.
async fn read_capped(mut response: reqwest::Response, max: usize) -> Option<String> {
    let mut buf = Vec::new();
    while buf.len() < max {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(max - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "response body read failed");
                break;
            }
        }
    }
    let text = truncate_body(&String::from_utf8_lossy(&buf), max);
    (!text.is_empty()).then_some(text)
}

fn request_error(err: reqwest::Error) -> TransportOutcome {
    let message = if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    };
    TransportOutcome::failed(err.status().map(|s| s.as_u16()), message)
}

fn payload_str<'a>(payload: &'a JsonValue, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(JsonValue::as_str).filter(|s| !s.is_empty())
}

/// Generic webhook: POST the payload as JSON.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectorTransport for WebhookTransport {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Webhook
    }

    async fn send(&self, delivery: &ConnectorDelivery) -> TransportOutcome {
        let ConnectorTarget::Webhook(target) = &delivery.target else {
            return target_mismatch(delivery, ConnectorType::Webhook);
        };

        let mut request = self
            .client
            .post(&target.url)
            .header(IDEMPOTENCY_HEADER, delivery.id.to_string())
            .json(&delivery.payload);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        outcome_from(request.send().await).await
    }
}

/// Slack incoming webhook; `payload.text` or the compact payload becomes the message.
#[derive(Debug, Clone)]
pub struct SlackTransport {
    client: reqwest::Client,
}

impl SlackTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

pub(crate) fn slack_message(delivery: &ConnectorDelivery, channel: Option<&str>) -> JsonValue {
    let text = payload_str(&delivery.payload, "text")
        .map(str::to_string)
        .unwrap_or_else(|| delivery.payload.to_string());
    let mut message = json!({ "text": text });
    if let Some(channel) = channel {
        message["channel"] = JsonValue::String(channel.to_string());
    }
    message
}

#[async_trait]
impl ConnectorTransport for SlackTransport {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Slack
    }

    async fn send(&self, delivery: &ConnectorDelivery) -> TransportOutcome {
        let ConnectorTarget::Slack(target) = &delivery.target else {
            return target_mismatch(delivery, ConnectorType::Slack);
        };

        let request = self
            .client
            .post(&target.webhook_url)
            .header(IDEMPOTENCY_HEADER, delivery.id.to_string())
            .json(&slack_message(delivery, target.channel.as_deref()));
        outcome_from(request.send().await).await
    }
}

/// Jira issue creation through the REST API with basic auth.
#[derive(Debug, Clone)]
pub struct JiraTransport {
    client: reqwest::Client,
}

impl JiraTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

pub(crate) fn jira_issue(delivery: &ConnectorDelivery, project_key: &str, issue_type: &str) -> JsonValue {
    let summary = payload_str(&delivery.payload, "summary")
        .map(str::to_string)
        .unwrap_or_else(|| format!("Connector delivery {}", delivery.id));
    let description = payload_str(&delivery.payload, "description")
        .map(str::to_string)
        .unwrap_or_else(|| {
            serde_json::to_string_pretty(&delivery.payload).unwrap_or_else(|_| delivery.payload.to_string())
        });

    json!({
        "fields": {
            "project": { "key": project_key },
            "summary": summary,
            "description": description,
            "issuetype": { "name": issue_type },
        }
    })
}

#[async_trait]
impl ConnectorTransport for JiraTransport {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Jira
    }

    async fn send(&self, delivery: &ConnectorDelivery) -> TransportOutcome {
        let ConnectorTarget::Jira(target) = &delivery.target else {
            return target_mismatch(delivery, ConnectorType::Jira);
        };

        let url = format!("{}/rest/api/2/issue", target.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(url)
            .basic_auth(&target.email, Some(&target.api_token))
            .header(IDEMPOTENCY_HEADER, delivery.id.to_string())
            .json(&jira_issue(delivery, &target.project_key, &target.issue_type));
        outcome_from(request.send().await).await
    }
}

/// SQS `SendMessage` over the query API.
///
/// Requests are unsigned; signing is expected from a gateway or sidecar in
/// front of the queue endpoint.
#[derive(Debug, Clone)]
pub struct SqsTransport {
    client: reqwest::Client,
}

impl SqsTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConnectorTransport for SqsTransport {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Sqs
    }

    async fn send(&self, delivery: &ConnectorDelivery) -> TransportOutcome {
        let ConnectorTarget::Sqs(target) = &delivery.target else {
            return target_mismatch(delivery, ConnectorType::Sqs);
        };

        let body = delivery.payload.to_string();
        let delivery_id = delivery.id.to_string();
        let mut form = vec![
            ("Action", "SendMessage"),
            ("Version", "2012-11-05"),
            ("MessageBody", body.as_str()),
        ];
        if target.queue_url.ends_with(".fifo") {
            form.push(("MessageDeduplicationId", delivery_id.as_str()));
            form.push(("MessageGroupId", delivery.connector_type.as_str()));
        }

        let request = self
            .client
            .post(&target.queue_url)
            .header(IDEMPOTENCY_HEADER, delivery_id.as_str())
            .form(&form);
        outcome_from(request.send().await).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{delivery_for, spawn_receiver};
    use serde_json::json;

    #[test]
    fn slack_text_prefers_payload_text() {
        let mut d = delivery_for(ConnectorType::Slack);
        d.payload = json!({"text": "review approved"});
        assert_eq!(
            slack_message(&d, Some("#ops")),
            json!({"text": "review approved", "channel": "#ops"})
        );

        d.payload = json!({"event": "x"});
        assert_eq!(slack_message(&d, None), json!({"text": "{\"event\":\"x\"}"}));
    }

    #[test]
    fn jira_issue_uses_summary_or_fallback() {
        let mut d = delivery_for(ConnectorType::Jira);
        d.payload = json!({"summary": "Extraction failed"});
        let issue = jira_issue(&d, "OPS", "Bug");
        assert_eq!(issue["fields"]["summary"], "Extraction failed");
        assert_eq!(issue["fields"]["project"]["key"], "OPS");
        assert_eq!(issue["fields"]["issuetype"]["name"], "Bug");

        d.payload = json!({});
        let issue = jira_issue(&d, "OPS", "Task");
        assert!(issue["fields"]["summary"].as_str().unwrap().starts_with("Connector delivery"));
    }

    #[tokio::test]
    async fn webhook_posts_payload_with_idempotency_key() {
        let receiver = spawn_receiver(200).await;
        let mut d = delivery_for(ConnectorType::Webhook);
        d.target = ConnectorTarget::Webhook(conduit_delivery::WebhookTarget {
            url: receiver.url(),
            headers: [("X-Source".to_string(), "conduit".to_string())].into(),
        });

        let outcome = WebhookTransport::new(reqwest::Client::new()).send(&d).await;
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.status_code, Some(200));

        let seen = receiver.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].idempotency_key.as_deref(), Some(d.id.to_string().as_str()));
        assert_eq!(seen[0].body, d.payload.to_string());
    }

    #[tokio::test]
    async fn non_2xx_is_a_failed_outcome() {
        let receiver = spawn_receiver(503).await;
        let mut d = delivery_for(ConnectorType::Webhook);
        d.target = ConnectorTarget::Webhook(conduit_delivery::WebhookTarget {
            url: receiver.url(),
            headers: Default::default(),
        });

        let outcome = WebhookTransport::new(reqwest::Client::new()).send(&d).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, Some(503));
        assert_eq!(outcome.summary(), "HTTP 503: Service Unavailable");
    }

    #[tokio::test]
    async fn large_response_body_is_capped() {
        let app = axum::Router::new().fallback(|| async { "x".repeat(1024 * 1024) });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut d = delivery_for(ConnectorType::Webhook);
        d.target = ConnectorTarget::Webhook(conduit_delivery::WebhookTarget {
            url,
            headers: Default::default(),
        });
        let outcome = WebhookTransport::new(reqwest::Client::new()).send(&d).await;
        assert!(outcome.success);
        assert_eq!(outcome.response_body.unwrap().len(), MAX_RESPONSE_BODY_BYTES);
    }

    #[tokio::test]
    async fn connection_refused_is_a_failed_outcome() {
        let mut d = delivery_for(ConnectorType::Webhook);
        d.target = ConnectorTarget::Webhook(conduit_delivery::WebhookTarget {
            url: "http://127.0.0.1:9/unreachable".to_string(),
            headers: Default::default(),
        });
        let outcome = WebhookTransport::new(reqwest::Client::new()).send(&d).await;
        assert!(!outcome.success);
        assert!(outcome.status_code.is_none());
    }

    #[tokio::test]
    async fn wrong_target_is_reported() {
        let d = delivery_for(ConnectorType::Slack);
        let outcome = WebhookTransport::new(reqwest::Client::new()).send(&d).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("expected webhook"));
    }
}
