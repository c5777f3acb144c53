use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tracing::warn;

use crate::{error::AppError, services::gateway, state::SharedState};

#[derive(Debug, Deserialize)]
/// Query parameters accepted by the party WebSocket endpoint.
pub struct WsQuery {
    /// Session token issued by the main backend.
    token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/ws",
    tag = "sync",
    params(("token" = String, Query, description = "Session token issued by the main backend")),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 401, description = "Missing, unknown, or expired session token")
    )
)]
/// Resolve the session token, then upgrade into a party WebSocket session.
///
/// Authentication happens before the upgrade so an invalid token costs a
/// plain 401 instead of an accepted-then-dropped socket.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let token = query
        .token
        .ok_or_else(|| AppError::Unauthorized("missing `token` query parameter".into()))?;
    let identity = state
        .identity_provider()
        .resolve_token(&token)
        .await
        .map_err(|err| {
            warn!(error = %err, "session token resolution failed");
            AppError::ServiceUnavailable("session token could not be verified".into())
        })?
        .ok_or_else(|| AppError::Unauthorized("unknown or expired session token".into()))?;

    let shared_state = state.clone();
    Ok(ws.on_upgrade(move |socket| gateway::handle_socket(shared_state, socket, identity)))
}

/// Configure the party WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
