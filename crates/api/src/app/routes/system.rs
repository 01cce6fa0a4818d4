use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(principal): Extension<PrincipalContext>,
    Path(project_id): Path<String>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "project_id": project_id,
        "actor_id": principal.actor_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "permissions": principal.principal().permissions.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
    }))
}
