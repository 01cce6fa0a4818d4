//! Permission checks at the handler boundary.

use axum::http::StatusCode;
use axum::response::Response;

use conduit_auth::{Permission, authorize};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// 403 unless the caller holds `required`.
pub fn require(principal: &PrincipalContext, required: &Permission) -> Result<(), Response> {
    authorize(principal.principal(), required)
        .map_err(|e| json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}
