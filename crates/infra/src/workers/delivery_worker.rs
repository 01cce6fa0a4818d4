use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use conduit_delivery::validation::DEFAULT_BATCH_LIMIT;
use conduit_delivery::{ProcessQueueParams, RecommendationParams};

use crate::pipeline::{DeliveryService, ServiceError};

/// In-flight guard for one worker: a tick is skipped while another runs.
pub trait TickGuard: Send + Sync {
    /// Returns `false` when a tick is already in flight.
    fn try_acquire(&self) -> bool;
    fn release(&self);
}

/// Default guard: a single atomic flag.
#[derive(Debug, Default)]
pub struct AtomicTickGuard {
    busy: AtomicBool,
}

impl AtomicTickGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TickGuard for AtomicTickGuard {
    fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Releases the guard on drop, including when the tick panics.
struct TickPermit {
    guard: Arc<dyn TickGuard>,
}

impl TickPermit {
    fn acquire(guard: &Arc<dyn TickGuard>) -> Option<Self> {
        guard.try_acquire().then(|| TickPermit {
            guard: guard.clone(),
        })
    }
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.guard.release();
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryWorkerConfig {
    pub name: String,
    pub tick_interval: Duration,
    /// Requested drain limit per (project, connector); backpressure may lower it.
    pub batch_limit: u32,
    /// Run recommendations every N ticks; `0` disables them.
    pub recommend_every_ticks: u64,
    pub recommendation: RecommendationParams,
}

impl Default for DeliveryWorkerConfig {
    fn default() -> Self {
        Self {
            name: "delivery-worker".to_string(),
            tick_interval: Duration::from_secs(5),
            batch_limit: DEFAULT_BATCH_LIMIT,
            recommend_every_ticks: 12,
            recommendation: RecommendationParams::default(),
        }
    }
}

impl DeliveryWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_recommend_every_ticks(mut self, ticks: u64) -> Self {
        self.recommend_every_ticks = ticks;
        self
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub targets: usize,
    pub processed: usize,
    pub recommendation_runs: usize,
    pub actions_executed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub ticks_failed: u64,
    pub deliveries_processed: u64,
}

#[derive(Debug, Default)]
struct StatsCells {
    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
    ticks_failed: AtomicU64,
    deliveries_processed: AtomicU64,
}

impl StatsCells {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            ticks_failed: self.ticks_failed.load(Ordering::Relaxed),
            deliveries_processed: self.deliveries_processed.load(Ordering::Relaxed),
        }
    }
}

/// Handle to stop a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<StatsCells>,
}

impl WorkerHandle {
    /// Stop scheduling new ticks, then wait for any in-flight tick and the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "delivery worker loop ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }
}

/// Periodically drains every due (project, connector) pair and, every few
/// ticks, runs automated remediation for recently active projects.
pub struct DeliveryWorker {
    service: Arc<DeliveryService>,
    config: DeliveryWorkerConfig,
    guard: Arc<dyn TickGuard>,
    stats: Arc<StatsCells>,
}

impl DeliveryWorker {
    pub fn new(service: Arc<DeliveryService>, config: DeliveryWorkerConfig) -> Self {
        Self {
            service,
            config,
            guard: Arc::new(AtomicTickGuard::new()),
            stats: Arc::new(StatsCells::default()),
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn TickGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let worker = Arc::new(self);

        let join = tokio::spawn(async move {
            let name = worker.config.name.clone();
            info!(worker = %name, interval_ms = worker.config.tick_interval.as_millis() as u64, "delivery worker started");

            let mut interval = tokio::time::interval(worker.config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut tick_number = 0u64;
            let mut in_flight = JoinSet::new();

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(err) = done {
                            error!(worker = %name, error = %err, "delivery tick task failed");
                        }
                    }
                    _ = interval.tick() => {
                        tick_number += 1;
                        let w = worker.clone();
                        in_flight.spawn(async move {
                            w.run_guarded(tick_number).await;
                        });
                    }
                }
            }

            if !in_flight.is_empty() {
                info!(worker = %name, ticks = in_flight.len(), "waiting for in-flight ticks");
            }
            while let Some(done) = in_flight.join_next().await {
                if let Err(err) = done {
                    error!(worker = %name, error = %err, "delivery tick task failed");
                }
            }
            info!(worker = %name, "delivery worker stopped");
        });

        WorkerHandle {
            shutdown,
            join,
            stats,
        }
    }

    /// Run one tick unless the previous one is still in flight.
    pub async fn run_guarded(&self, tick_number: u64) -> Option<Result<TickReport, ServiceError>> {
        let Some(_permit) = TickPermit::acquire(&self.guard) else {
            debug!(worker = %self.config.name, tick_number, "previous tick still running; skipping");
            self.stats.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let result = self.tick(tick_number).await;
        match &result {
            Ok(report) => {
                self.stats.ticks_run.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .deliveries_processed
                    .fetch_add(report.processed as u64, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.ticks_failed.fetch_add(1, Ordering::Relaxed);
                error!(worker = %self.config.name, tick_number, error = %err, "delivery tick aborted");
            }
        }
        Some(result)
    }

    /// One pass over all due work. An unavailable store aborts the tick;
    /// untouched deliveries are picked up on the next one.
    pub async fn tick(&self, tick_number: u64) -> Result<TickReport, ServiceError> {
        let mut report = TickReport::default();
        let targets = self.service.due_targets()?;
        report.targets = targets.len();

        for (project_id, connector_type) in targets {
            let params = ProcessQueueParams {
                limit: self.config.batch_limit,
                backpressure: None,
            };
            match self
                .service
                .process_queue(project_id, connector_type, params, None)
                .await
            {
                Ok(drained) => report.processed += drained.processed_count,
                Err(err @ ServiceError::Infrastructure(_)) => return Err(err),
                Err(err) => {
                    warn!(%project_id, connector = %connector_type, error = %err, "drain failed");
                }
            }
        }

        let every = self.config.recommend_every_ticks;
        if every > 0 && tick_number % every == 0 {
            let params = self.config.recommendation;
            for project_id in self.service.active_projects(params.lookback_hours)? {
                match self.service.run_recommendations(project_id, params, None).await {
                    Ok(run) => {
                        report.recommendation_runs += 1;
                        report.actions_executed += run.action_results.len();
                    }
                    Err(err @ ServiceError::Infrastructure(_)) => return Err(err),
                    Err(err) => {
                        warn!(%project_id, error = %err, "recommendation run failed");
                    }
                }
            }
        }

        if report.targets > 0 {
            debug!(
                worker = %self.config.name,
                tick_number,
                targets = report.targets,
                processed = report.processed,
                "delivery tick finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ScriptedTransport, TransportRegistry};
    use conduit_core::ProjectId;
    use conduit_delivery::{ConnectorType, DeliverRequest, DeliveryStatus, DispatchMode};
    use serde_json::json;

    fn service() -> Arc<DeliveryService> {
        let registry = TransportRegistry::new(Duration::from_secs(1))
            .with(ScriptedTransport::new(ConnectorType::Webhook))
            .with(ScriptedTransport::new(ConnectorType::Slack));
        Arc::new(DeliveryService::in_memory(registry))
    }

    fn request(connector_type: ConnectorType) -> DeliverRequest {
        let config = match connector_type {
            ConnectorType::Slack => json!({"webhook_url": "https://hooks.slack.com/services/T0/B0/x"}),
            _ => json!({"url": "https://hooks.example.com/in"}),
        };
        DeliverRequest {
            payload: json!({"text": "nightly sync finished"}),
            config: Some(config),
            mode: Some(DispatchMode::Enqueue),
            ..Default::default()
        }
    }

    #[test]
    fn atomic_guard_allows_one_holder() {
        let guard: Arc<dyn TickGuard> = Arc::new(AtomicTickGuard::new());
        let first = TickPermit::acquire(&guard);
        assert!(first.is_some());
        assert!(TickPermit::acquire(&guard).is_none());
        drop(first);
        assert!(TickPermit::acquire(&guard).is_some());
    }

    struct AlwaysBusy;

    impl TickGuard for AlwaysBusy {
        fn try_acquire(&self) -> bool {
            false
        }
        fn release(&self) {}
    }

    #[tokio::test]
    async fn busy_guard_skips_the_tick() {
        let service = service();
        let project = ProjectId::new();
        let d = service
            .deliver(project, ConnectorType::Webhook, request(ConnectorType::Webhook), None)
            .await
            .unwrap();

        let worker = DeliveryWorker::new(service.clone(), DeliveryWorkerConfig::default())
            .with_guard(Arc::new(AlwaysBusy));
        assert!(worker.run_guarded(1).await.is_none());
        assert_eq!(worker.stats.snapshot().ticks_skipped, 1);

        let detail = service.get_delivery(project, d.delivery.id).unwrap();
        assert_eq!(detail.delivery.status, DeliveryStatus::Queued);
    }

    #[tokio::test]
    async fn tick_drains_every_due_target() {
        let service = service();
        let (a, b) = (ProjectId::new(), ProjectId::new());
        service
            .deliver(a, ConnectorType::Webhook, request(ConnectorType::Webhook), None)
            .await
            .unwrap();
        service
            .deliver(b, ConnectorType::Slack, request(ConnectorType::Slack), None)
            .await
            .unwrap();

        let worker = DeliveryWorker::new(service.clone(), DeliveryWorkerConfig::default());
        let report = worker.tick(1).await.unwrap();
        assert_eq!(report.targets, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.recommendation_runs, 0);

        assert_eq!(service.summarize(a, ConnectorType::Webhook).unwrap().delivered, 1);
        assert_eq!(service.summarize(b, ConnectorType::Slack).unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn recommendations_run_on_their_cadence() {
        let service = service();
        let project = ProjectId::new();
        service
            .deliver(project, ConnectorType::Webhook, request(ConnectorType::Webhook), None)
            .await
            .unwrap();

        let config = DeliveryWorkerConfig::default().with_recommend_every_ticks(2);
        let worker = DeliveryWorker::new(service, config);
        assert_eq!(worker.tick(1).await.unwrap().recommendation_runs, 0);
        assert_eq!(worker.tick(2).await.unwrap().recommendation_runs, 1);
    }

    #[tokio::test]
    async fn spawned_worker_delivers_and_shuts_down() {
        let service = service();
        let project = ProjectId::new();
        let d = service
            .deliver(project, ConnectorType::Webhook, request(ConnectorType::Webhook), None)
            .await
            .unwrap();

        let config = DeliveryWorkerConfig::default().with_tick_interval(Duration::from_millis(20));
        let handle = DeliveryWorker::new(service.clone(), config).spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.stats().ticks_run >= 1);
        handle.shutdown().await;

        let detail = service.get_delivery(project, d.delivery.id).unwrap();
        assert_eq!(detail.delivery.status, DeliveryStatus::Delivered);
        assert_eq!(detail.attempts.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_tick_in_flight() {
        let registry = TransportRegistry::new(Duration::from_secs(2)).with(
            ScriptedTransport::new(ConnectorType::Webhook).with_delay(Duration::from_millis(300)),
        );
        let service = Arc::new(DeliveryService::in_memory(registry));
        let project = ProjectId::new();
        let d = service
            .deliver(project, ConnectorType::Webhook, request(ConnectorType::Webhook), None)
            .await
            .unwrap();

        let config = DeliveryWorkerConfig::default().with_tick_interval(Duration::from_millis(20));
        let handle = DeliveryWorker::new(service.clone(), config).spawn();
        // First tick fires at once and is now blocked inside the transport.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handle.stats().ticks_run, 0);
        handle.shutdown().await;

        let detail = service.get_delivery(project, d.delivery.id).unwrap();
        assert_eq!(detail.delivery.status, DeliveryStatus::Delivered);
        assert_eq!(detail.attempts.len(), 1);
    }
}
