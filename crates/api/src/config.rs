//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

use conduit_delivery::validation::{DEFAULT_BATCH_LIMIT, MAX_BATCH_LIMIT};
use conduit_infra::workers::DeliveryWorkerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub transport_timeout: Duration,
    pub worker_enabled: bool,
    pub worker_tick: Duration,
    pub worker_batch_limit: u32,
    /// `0` disables automated remediation.
    pub recommend_every_ticks: u64,
    /// Enables the `db_sink` transport when set.
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            transport_timeout: Duration::from_millis(10_000),
            worker_enabled: true,
            worker_tick: Duration::from_millis(5_000),
            worker_batch_limit: DEFAULT_BATCH_LIMIT,
            recommend_every_ticks: 12,
            database_url: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Malformed values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let timeout_ms = parse_or(&lookup, "CONDUIT_TRANSPORT_TIMEOUT_MS", 10_000u64).clamp(100, 120_000);
        let tick_ms = parse_or(&lookup, "CONDUIT_WORKER_TICK_MS", 5_000u64).max(1);
        let batch_limit =
            parse_or(&lookup, "CONDUIT_WORKER_BATCH_LIMIT", DEFAULT_BATCH_LIMIT).clamp(1, MAX_BATCH_LIMIT);

        Self {
            bind_addr: parse_or(&lookup, "CONDUIT_BIND_ADDR", defaults.bind_addr),
            transport_timeout: Duration::from_millis(timeout_ms),
            worker_enabled: parse_or(&lookup, "CONDUIT_WORKER_ENABLED", defaults.worker_enabled),
            worker_tick: Duration::from_millis(tick_ms),
            worker_batch_limit: batch_limit,
            recommend_every_ticks: parse_or(
                &lookup,
                "CONDUIT_RECOMMEND_EVERY_TICKS",
                defaults.recommend_every_ticks,
            ),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn worker_config(&self) -> DeliveryWorkerConfig {
        DeliveryWorkerConfig::default()
            .with_tick_interval(self.worker_tick)
            .with_batch_limit(self.worker_batch_limit)
            .with_recommend_every_ticks(self.recommend_every_ticks)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + core::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, ?default, "malformed config value; using default");
            default
        }),
    }
}
