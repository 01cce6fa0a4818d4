use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use conduit_infra::DeliveryService;
use conduit_infra::transport::TransportRegistry;

use crate::config::AppConfig;

/// Wire transports and stores for the configured environment.
pub fn build_service(config: &AppConfig) -> anyhow::Result<Arc<DeliveryService>> {
    let client = reqwest::Client::builder()
        .timeout(config.transport_timeout)
        .build()
        .context("building HTTP client")?;

    let pool = match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect_lazy(url)
                .context("parsing DATABASE_URL")?;
            info!("db_sink transport enabled");
            Some(pool)
        }
        None => None,
    };

    let registry = TransportRegistry::with_defaults(client, pool, config.transport_timeout);
    Ok(Arc::new(DeliveryService::in_memory(registry)))
}
