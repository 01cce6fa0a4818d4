use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    response::IntoResponse,
};

use conduit_auth::Permission;
use conduit_delivery::validation::{DEFAULT_BATCH_LIMIT, MAX_BATCH_LIMIT};
use conduit_delivery::{DeliverRequest, DeliveryStatus, ValidationErrors};
use conduit_infra::DeliveryService;
use conduit_infra::store::DeliveryFilter;

use crate::app::dto::{self, DeliverResponse, DeliveryDetailResponse};
use crate::app::errors::{self, ApiResult};
use crate::authz::require;
use crate::context::PrincipalContext;

pub async fn deliver(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, connector_type)): Path<(String, String)>,
    body: Result<Json<DeliverRequest>, JsonRejection>,
) -> ApiResult {
    require(&principal, &Permission::DELIVERIES_WRITE)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let connector_type = errors::parse_connector(&connector_type)?;
    let Json(request) = body.map_err(errors::body_rejection)?;

    let result = service
        .deliver(project_id, connector_type, request, Some(principal.actor_id()))
        .await
        .map_err(errors::service_error_to_response)?;

    // A duplicate submission is still a success, just not a creation.
    let status = if result.duplicate { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(DeliverResponse::from(result))).into_response())
}

pub async fn list(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(project_id): Path<String>,
    query: Result<Query<dto::ListDeliveriesQuery>, QueryRejection>,
) -> ApiResult {
    require(&principal, &Permission::DELIVERIES_READ)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let Query(query) = query.map_err(errors::query_rejection)?;

    let connector_type = query
        .connector_type
        .as_deref()
        .map(errors::parse_connector)
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<DeliveryStatus>()
                .map_err(|e| errors::validation_response(ValidationErrors::single("status", e.to_string())))
        })
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_BATCH_LIMIT);
    if !(1..=MAX_BATCH_LIMIT).contains(&limit) {
        return Err(errors::validation_response(ValidationErrors::single(
            "limit",
            format!("must be between 1 and {MAX_BATCH_LIMIT}"),
        )));
    }

    let filter = DeliveryFilter {
        connector_type,
        status,
        limit: limit as usize,
    };
    let deliveries = service
        .list_deliveries(project_id, filter)
        .map_err(errors::service_error_to_response)?;

    Ok(Json(serde_json::json!({ "deliveries": dto::delivery_views(deliveries) })).into_response())
}

pub async fn get_delivery(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, delivery_id)): Path<(String, String)>,
) -> ApiResult {
    require(&principal, &Permission::DELIVERIES_READ)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let delivery_id = errors::parse_delivery_id(&delivery_id)?;

    let detail = service
        .get_delivery(project_id, delivery_id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(DeliveryDetailResponse::from(detail)).into_response())
}
