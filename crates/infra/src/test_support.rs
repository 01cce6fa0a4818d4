//! Shared fixtures for the crate's unit tests.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde_json::json;

use conduit_core::ProjectId;
use conduit_delivery::{
    ConnectorDelivery, ConnectorTarget, ConnectorType, DbSinkTarget, DispatchMode, JiraTarget,
    SlackTarget, SqsTarget, ValidatedDelivery, WebhookTarget, payload_hash,
};

pub(crate) fn target_for(connector_type: ConnectorType) -> ConnectorTarget {
    match connector_type {
        ConnectorType::Webhook => ConnectorTarget::Webhook(WebhookTarget {
            url: "https://hooks.example.com/in".to_string(),
            headers: Default::default(),
        }),
        ConnectorType::Slack => ConnectorTarget::Slack(SlackTarget {
            webhook_url: "https://hooks.slack.example.com/T0/B0".to_string(),
            channel: None,
        }),
        ConnectorType::Jira => ConnectorTarget::Jira(JiraTarget {
            base_url: "https://acme.atlassian.example.com".to_string(),
            project_key: "OPS".to_string(),
            issue_type: "Task".to_string(),
            email: "bot@acme.example.com".to_string(),
            api_token: "token".to_string(),
        }),
        ConnectorType::Sqs => ConnectorTarget::Sqs(SqsTarget {
            queue_url: "https://sqs.example.com/000/events".to_string(),
        }),
        ConnectorType::DbSink => ConnectorTarget::DbSink(DbSinkTarget {
            table: "connector_delivery_sink".to_string(),
        }),
    }
}

pub(crate) fn validated(
    project_id: ProjectId,
    connector_type: ConnectorType,
    max_attempts: u32,
) -> ValidatedDelivery {
    let payload = json!({"event": "workflow.completed", "run": 42});
    ValidatedDelivery {
        project_id,
        connector_type,
        payload_hash: payload_hash(&payload),
        payload,
        target: target_for(connector_type),
        idempotency_key: None,
        mode: DispatchMode::Enqueue,
        max_attempts,
        initial_backoff_ms: 1_000,
    }
}

pub(crate) fn delivery_for(connector_type: ConnectorType) -> ConnectorDelivery {
    ConnectorDelivery::enqueue(&validated(ProjectId::new(), connector_type, 5), Utc::now())
}

#[derive(Debug, Clone)]
pub(crate) struct SeenRequest {
    pub idempotency_key: Option<String>,
    pub body: String,
}

#[derive(Clone)]
struct ReceiverState {
    status: StatusCode,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

/// Local HTTP endpoint answering every request with a fixed status.
pub(crate) struct Receiver {
    addr: std::net::SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl Receiver {
    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

async fn receive(State(state): State<ReceiverState>, headers: HeaderMap, body: String) -> StatusCode {
    state.seen.lock().unwrap().push(SeenRequest {
        idempotency_key: headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    state.status
}

pub(crate) async fn spawn_receiver(status: u16) -> Receiver {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let state = ReceiverState {
        status: StatusCode::from_u16(status).unwrap(),
        seen: seen.clone(),
    };
    let app = Router::new().fallback(receive).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Receiver { addr, seen }
}
