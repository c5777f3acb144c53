use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Watch Party Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::signaling::signaling_handler,
        crate::routes::internal::delete_party,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ws::JoinPartyPayload,
            crate::dto::ws::LeavePartyPayload,
            crate::dto::ws::PlayWishPayload,
            crate::dto::ws::LastPositionPayload,
            crate::dto::ws::SyncStatusPayload,
            crate::dto::ws::ChatMessagePayload,
            crate::dto::ws::WebRtcPresencePayload,
            crate::dto::ws::PlayOrderPayload,
            crate::dto::ws::SyncStatusBroadcast,
            crate::dto::ws::MemberStatusPayload,
            crate::dto::signaling::SignalingHello,
            crate::dto::signaling::SignalForward,
            crate::state::registry::MediaKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sync", description = "WebSocket endpoint for party playback synchronization"),
        (name = "signaling", description = "WebSocket relay for webRTC signaling"),
        (name = "internal", description = "Backend-to-backend party lifecycle hooks"),
    )
)]
pub struct ApiDoc;
