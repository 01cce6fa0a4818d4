use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    response::IntoResponse,
};

use conduit_auth::Permission;
use conduit_delivery::{ProcessQueueRequest, RedriveRequest};
use conduit_infra::DeliveryService;

use crate::app::dto::{ProcessQueueResponse, RedriveResponse};
use crate::app::errors::{self, ApiResult};
use crate::authz::require;
use crate::context::PrincipalContext;

pub async fn process(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, connector_type)): Path<(String, String)>,
    body: Result<Json<ProcessQueueRequest>, JsonRejection>,
) -> ApiResult {
    require(&principal, &Permission::QUEUE_PROCESS)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let connector_type = errors::parse_connector(&connector_type)?;
    let Json(request) = body.map_err(errors::body_rejection)?;
    let params = request.validate().map_err(errors::validation_response)?;

    let report = service
        .process_queue(project_id, connector_type, params, Some(principal.actor_id()))
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(ProcessQueueResponse::from(report)).into_response())
}

pub async fn redrive(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, connector_type)): Path<(String, String)>,
    body: Result<Json<RedriveRequest>, JsonRejection>,
) -> ApiResult {
    require(&principal, &Permission::QUEUE_REDRIVE)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let connector_type = errors::parse_connector(&connector_type)?;
    let Json(request) = body.map_err(errors::body_rejection)?;
    let params = request.validate().map_err(errors::validation_response)?;
    if params.process_after_redrive {
        require(&principal, &Permission::QUEUE_PROCESS)?;
    }

    let report = service
        .redrive(project_id, connector_type, params, Some(principal.actor_id()))
        .await
        .map_err(errors::service_error_to_response)?;
    Ok(Json(RedriveResponse::from(report)).into_response())
}

pub async fn summary(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, connector_type)): Path<(String, String)>,
) -> ApiResult {
    require(&principal, &Permission::DELIVERIES_READ)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let connector_type = errors::parse_connector(&connector_type)?;

    let summary = service
        .summarize(project_id, connector_type)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(summary).into_response())
}
