use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use conduit_core::{DeliveryId, DraftId, ProjectId};
use conduit_delivery::validation::parse_connector_type;
use conduit_delivery::{ConnectorType, ValidationErrors};
use conduit_infra::ServiceError;

pub type ApiResult = Result<Response, Response>;

pub fn service_error_to_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Validation(errors) => validation_response(errors),
        ServiceError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found")),
        ServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ServiceError::Infrastructure(msg) => {
            tracing::error!(error = %msg, "store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", "delivery store is unavailable; retry later")
        }
    }
}

pub fn validation_response(errors: ValidationErrors) -> Response {
    (
        StatusCode::BAD_REQUEST,
        axum::Json(json!({
            "error": "validation_error",
            "message": errors.to_string(),
            "details": errors.errors,
        })),
    )
        .into_response()
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Malformed JSON bodies are reported like any other validation failure.
pub fn body_rejection(rejection: JsonRejection) -> Response {
    validation_response(ValidationErrors::single("body", rejection.body_text()))
}

pub fn query_rejection(rejection: QueryRejection) -> Response {
    validation_response(ValidationErrors::single("query", rejection.body_text()))
}

pub fn parse_project_id(raw: &str) -> Result<ProjectId, Response> {
    raw.parse()
        .map_err(|_| validation_response(ValidationErrors::single("project_id", "must be a UUID")))
}

pub fn parse_delivery_id(raw: &str) -> Result<DeliveryId, Response> {
    raw.parse()
        .map_err(|_| validation_response(ValidationErrors::single("delivery_id", "must be a UUID")))
}

pub fn parse_draft_id(raw: &str) -> Result<DraftId, Response> {
    raw.parse()
        .map_err(|_| validation_response(ValidationErrors::single("draft_id", "must be a UUID")))
}

pub fn parse_connector(raw: &str) -> Result<ConnectorType, Response> {
    parse_connector_type(raw).map_err(validation_response)
}
