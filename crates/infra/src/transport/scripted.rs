//! Transport that replays scripted outcomes (tests, demos, dry environments).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use conduit_core::DeliveryId;
use conduit_delivery::{ConnectorDelivery, ConnectorType, TransportOutcome};

use super::ConnectorTransport;

#[derive(Debug)]
struct Script {
    queued: VecDeque<TransportOutcome>,
    fallback: TransportOutcome,
    calls: Vec<DeliveryId>,
}

/// Returns queued outcomes in order, then the fallback forever.
#[derive(Debug)]
pub struct ScriptedTransport {
    connector_type: ConnectorType,
    delay: Option<Duration>,
    script: Mutex<Script>,
}

impl ScriptedTransport {
    /// A transport that succeeds with HTTP 200 unless scripted otherwise.
    pub fn new(connector_type: ConnectorType) -> Self {
        Self {
            connector_type,
            delay: None,
            script: Mutex::new(Script {
                queued: VecDeque::new(),
                fallback: TransportOutcome::succeeded(Some(200), Some("ok".to_string())),
                calls: Vec::new(),
            }),
        }
    }

    /// A transport that always fails with the given status.
    pub fn failing(connector_type: ConnectorType, status_code: u16) -> Self {
        let t = Self::new(connector_type);
        t.set_fallback(TransportOutcome::failed(
            Some(status_code),
            format!("scripted failure {status_code}"),
        ));
        t
    }

    pub fn push(self, outcome: TransportOutcome) -> Self {
        self.lock().queued.push_back(outcome);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_fallback(&self, outcome: TransportOutcome) {
        self.lock().fallback = outcome;
    }

    /// Delivery ids in the order they were sent.
    pub fn calls(&self) -> Vec<DeliveryId> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ConnectorTransport for ScriptedTransport {
    fn connector_type(&self) -> ConnectorType {
        self.connector_type
    }

    async fn send(&self, delivery: &ConnectorDelivery) -> TransportOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.lock();
        script.calls.push(delivery.id);
        script
            .queued
            .pop_front()
            .unwrap_or_else(|| script.fallback.clone())
    }
}
