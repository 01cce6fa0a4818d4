//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: builds the delivery service from config
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response DTOs and redacted views
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use conduit_infra::DeliveryService;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router around an already wired service.
pub fn build_app(service: Arc<DeliveryService>) -> Router {
    // Project routes: require gateway identity.
    let protected = Router::new()
        .nest("/projects/:project_id", routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::identity_middleware))
                .layer(Extension(service)),
        );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
