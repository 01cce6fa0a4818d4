use axum::Router;
use axum::routing::{get, post};

pub mod deliveries;
pub mod policy;
pub mod queue;
pub mod recommendations;
pub mod system;

/// Router for all project-scoped endpoints (mounted under `/projects/:project_id`).
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/connectors/:connector_type/deliveries", post(deliveries::deliver))
        .route("/connectors/:connector_type/process", post(queue::process))
        .route("/connectors/:connector_type/redrive", post(queue::redrive))
        .route("/connectors/:connector_type/summary", get(queue::summary))
        .route("/deliveries", get(deliveries::list))
        .route("/deliveries/:delivery_id", get(deliveries::get_delivery))
        .route("/policy", get(policy::get_policy).put(policy::put_policy))
        .route("/policy/drafts", get(policy::list_drafts).post(policy::create_draft))
        .route("/policy/drafts/:draft_id/approve", post(policy::approve_draft))
        .route("/policy/drafts/:draft_id/apply", post(policy::apply_draft))
        .route("/recommendations/run", post(recommendations::run))
}
