use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{services::signaling_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/signaling",
    tag = "signaling",
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade into a signaling relay session.
///
/// The connection starts anonymous; authorization happens on the first
/// `hello` frame inside the socket.
pub async fn signaling_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let shared_state = state.clone();
    ws.on_upgrade(move |socket| signaling_service::handle_socket(shared_state, socket))
}

/// Configure the signaling WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/signaling", get(signaling_handler))
}
