use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use conduit_auth::Permission;
use conduit_delivery::PolicyRules;
use conduit_infra::DeliveryService;

use crate::app::dto::CreateDraftRequest;
use crate::app::errors::{self, ApiResult};
use crate::authz::require;
use crate::context::PrincipalContext;

pub async fn get_policy(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(project_id): Path<String>,
) -> ApiResult {
    require(&principal, &Permission::DELIVERIES_READ)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let policy = service
        .get_policy(project_id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(policy).into_response())
}

pub async fn put_policy(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(project_id): Path<String>,
    body: Result<Json<PolicyRules>, JsonRejection>,
) -> ApiResult {
    require(&principal, &Permission::POLICY_WRITE)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let Json(rules) = body.map_err(errors::body_rejection)?;

    let policy = service
        .put_policy(project_id, rules, principal.actor_id())
        .map_err(errors::service_error_to_response)?;
    Ok(Json(policy).into_response())
}

pub async fn create_draft(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(project_id): Path<String>,
    body: Result<Json<CreateDraftRequest>, JsonRejection>,
) -> ApiResult {
    require(&principal, &Permission::POLICY_WRITE)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let Json(request) = body.map_err(errors::body_rejection)?;

    let draft = service
        .create_draft(
            project_id,
            request.rules,
            request.required_approvals,
            request.activate_at,
            principal.actor_id(),
        )
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(draft)).into_response())
}

pub async fn list_drafts(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(project_id): Path<String>,
) -> ApiResult {
    require(&principal, &Permission::DELIVERIES_READ)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let drafts = service
        .list_drafts(project_id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(serde_json::json!({ "drafts": drafts })).into_response())
}

pub async fn approve_draft(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, draft_id)): Path<(String, String)>,
) -> ApiResult {
    require(&principal, &Permission::POLICY_APPROVE)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let draft_id = errors::parse_draft_id(&draft_id)?;

    let draft = service
        .approve_draft(project_id, draft_id, principal.actor_id())
        .map_err(errors::service_error_to_response)?;
    Ok(Json(draft).into_response())
}

pub async fn apply_draft(
    Extension(service): Extension<Arc<DeliveryService>>,
    Extension(principal): Extension<PrincipalContext>,
    Path((project_id, draft_id)): Path<(String, String)>,
) -> ApiResult {
    require(&principal, &Permission::POLICY_WRITE)?;
    let project_id = errors::parse_project_id(&project_id)?;
    let draft_id = errors::parse_draft_id(&draft_id)?;

    let policy = service
        .apply_draft(project_id, draft_id, principal.actor_id())
        .map_err(errors::service_error_to_response)?;
    Ok(Json(policy).into_response())
}
