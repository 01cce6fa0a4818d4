use anyhow::Context;
use tracing::info;

use conduit_api::app::{build_app, services};
use conduit_api::config::AppConfig;
use conduit_infra::workers::DeliveryWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    conduit_observability::init();

    let config = AppConfig::from_env();
    let service = services::build_service(&config)?;

    let worker = if config.worker_enabled {
        Some(DeliveryWorker::new(service.clone(), config.worker_config()).spawn())
    } else {
        info!("delivery worker disabled");
        None
    };

    let app = build_app(service);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
    info!("shutdown requested");
}
