//! Connector transports.
//!
//! One [`ConnectorTransport`] per connector type, looked up through a
//! [`TransportRegistry`]. Transports never return errors: every failure mode
//! (non-2xx, connection error, timeout, misconfiguration) is an unsuccessful
//! [`TransportOutcome`] that drives the retry branch of the state machine.

pub mod db_sink;
pub mod http;
pub mod scripted;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use conduit_delivery::{ConnectorDelivery, ConnectorType, TransportOutcome};

pub use db_sink::DbSinkTransport;
pub use http::{JiraTransport, SlackTransport, SqsTransport, WebhookTransport};
pub use scripted::ScriptedTransport;

/// Stored response bodies are cut to this many bytes.
pub const MAX_RESPONSE_BODY_BYTES: usize = 2 * 1024;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[async_trait]
pub trait ConnectorTransport: Send + Sync {
    fn connector_type(&self) -> ConnectorType;

    /// Attempt to hand the delivery's payload to the external system.
    async fn send(&self, delivery: &ConnectorDelivery) -> TransportOutcome;
}

/// Lookup table from connector type to transport, with a per-call timeout.
#[derive(Clone)]
pub struct TransportRegistry {
    transports: HashMap<ConnectorType, Arc<dyn ConnectorTransport>>,
    timeout: Duration,
}

impl core::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut registered: Vec<_> = self.transports.keys().collect();
        registered.sort();
        f.debug_struct("TransportRegistry")
            .field("registered", &registered)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TransportRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            transports: HashMap::new(),
            timeout,
        }
    }

    /// Registry wired with the HTTP transports; `db_sink` only when a pool is given.
    pub fn with_defaults(
        client: reqwest::Client,
        pool: Option<sqlx::PgPool>,
        timeout: Duration,
    ) -> Self {
        let mut registry = Self::new(timeout)
            .with(WebhookTransport::new(client.clone()))
            .with(SlackTransport::new(client.clone()))
            .with(JiraTransport::new(client.clone()))
            .with(SqsTransport::new(client));
        if let Some(pool) = pool {
            registry.register(DbSinkTransport::new(pool));
        }
        registry
    }

    pub fn register<T: ConnectorTransport + 'static>(&mut self, transport: T) {
        self.transports
            .insert(transport.connector_type(), Arc::new(transport));
    }

    pub fn with<T: ConnectorTransport + 'static>(mut self, transport: T) -> Self {
        self.register(transport);
        self
    }

    pub fn register_shared(&mut self, transport: Arc<dyn ConnectorTransport>) {
        self.transports.insert(transport.connector_type(), transport);
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send through the registered transport, bounded by the registry timeout.
    pub async fn dispatch(&self, delivery: &ConnectorDelivery) -> TransportOutcome {
        let Some(transport) = self.transports.get(&delivery.connector_type) else {
            return TransportOutcome::failed(
                None,
                format!("no transport registered for {}", delivery.connector_type),
            );
        };

        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, transport.send(delivery)).await {
            Ok(outcome) => outcome,
            Err(_) => TransportOutcome::failed(
                None,
                format!("timed out after {} ms", self.timeout.as_millis()),
            ),
        };
        let elapsed = started.elapsed().as_millis() as u64;

        debug!(
            delivery_id = %delivery.id,
            connector = %delivery.connector_type,
            success = outcome.success,
            status_code = ?outcome.status_code,
            duration_ms = elapsed,
            "transport call finished"
        );

        let body = outcome
            .response_body
            .as_deref()
            .map(|b| truncate_body(b, MAX_RESPONSE_BODY_BYTES));
        outcome.with_response_body(body).with_duration_ms(elapsed)
    }
}

/// Cut `body` to at most `max` bytes on a char boundary.
pub fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Outcome for a delivery whose stored target does not match the transport.
pub(crate) fn target_mismatch(delivery: &ConnectorDelivery, expected: ConnectorType) -> TransportOutcome {
    TransportOutcome::failed(
        None,
        format!(
            "delivery {} has a {} target; expected {expected}",
            delivery.id,
            delivery.target.connector_type()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::delivery_for;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_body("abc", 10), "abc");
        assert_eq!(truncate_body("abcdef", 3), "abc");
        // 'é' is two bytes; cutting in the middle backs off.
        assert_eq!(truncate_body("aé", 2), "a");
    }

    #[tokio::test]
    async fn missing_transport_is_a_failed_outcome() {
        let registry = TransportRegistry::new(Duration::from_secs(1));
        let outcome = registry.dispatch(&delivery_for(ConnectorType::Slack)).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no transport registered"));
    }

    #[tokio::test]
    async fn slow_transport_times_out() {
        let slow = ScriptedTransport::new(ConnectorType::Webhook)
            .with_delay(Duration::from_millis(200));
        let registry = TransportRegistry::new(Duration::from_millis(20)).with(slow);

        let outcome = registry.dispatch(&delivery_for(ConnectorType::Webhook)).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("timed out"));
    }

    #[tokio::test]
    async fn long_bodies_are_truncated() {
        let t = ScriptedTransport::new(ConnectorType::Webhook).push(
            TransportOutcome::succeeded(Some(200), Some("x".repeat(10_000))),
        );
        let registry = TransportRegistry::new(Duration::from_secs(1)).with(t);

        let outcome = registry.dispatch(&delivery_for(ConnectorType::Webhook)).await;
        assert_eq!(outcome.response_body.unwrap().len(), MAX_RESPONSE_BODY_BYTES);
    }
}
