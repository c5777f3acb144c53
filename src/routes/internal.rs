use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::delete,
};

use crate::{error::AppError, state::SharedState};

const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Backend-to-backend lifecycle hooks, guarded by the shared internal token.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/internal/parties/{id}", delete(delete_party))
        .route_layer(middleware::from_fn_with_state(
            state,
            require_internal_token,
        ))
}

#[utoipa::path(
    delete,
    path = "/internal/parties/{id}",
    tag = "internal",
    params(
        ("X-Internal-Token" = String, Header, description = "Shared secret configured on both backends"),
        ("id" = String, Path, description = "Identifier of the deleted party")
    ),
    responses(
        (status = 204, description = "Party state evicted"),
        (status = 401, description = "Missing or invalid internal token"),
        (status = 503, description = "Engine is shutting down")
    )
)]
/// Evict all synchronization state for a party deleted upstream.
pub async fn delete_party(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.coordinator().evict_party(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn require_internal_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| {
            AppError::Unauthorized("missing internal token header `X-Internal-Token`".into())
        })?;

    match state.config().internal_token() {
        Some(token) if token == provided => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("invalid internal token".into())),
        None => Err(AppError::Unauthorized(
            "no internal token configured; eviction hooks are disabled".into(),
        )),
    }
}
