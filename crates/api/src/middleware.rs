use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use conduit_auth::Principal;
use conduit_core::ActorId;

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";

/// Resolve the caller from gateway headers; 401 when the identity is missing.
pub async fn identity_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let actor_id = extract_actor(req.headers()).ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            format!("missing or invalid {ACTOR_ID_HEADER} header"),
        )
    })?;

    let roles = req
        .headers()
        .get(ACTOR_ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Principal::parse_roles)
        .unwrap_or_default();

    req.extensions_mut()
        .insert(PrincipalContext::new(actor_id, roles));

    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Option<ActorId> {
    headers
        .get(ACTOR_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
