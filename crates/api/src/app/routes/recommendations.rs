use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    response::IntoResponse,
};

use conduit_auth::Permission;
use conduit_delivery::RecommendationRequest;
use conduit_infra::DeliveryService;

use crate::app::errors::{self, ApiResult};
use crate::authz::require;
use crate::context::PrincipalContext;

pub async fn run(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(project_id): Path<String>,
    body: Result<Json<RecommendationRequest>, JsonRejection>,
) -> ApiResult {
    require(&principal, &Permission::RECOMMENDATIONS_RUN)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let Json(request) = body.map_err(errors::body_rejection)?;
    let params = request.validate().map_err(errors::validation_response)?;

    let report = service
        .run_recommendations(project_id, params, Some(principal.actor_id()))
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(report).into_response())
}
