/// Server-side clock reads and offset arithmetic.
pub mod clock;
/// OpenAPI documentation generation.
pub mod documentation;
/// WebSocket connection and message handling for party clients.
pub mod gateway;
/// Health check service.
pub mod health_service;
/// WebRTC signaling relay with directory-backed admission.
pub mod signaling_service;
/// Snapshot restore, periodic persistence, and shutdown flush.
pub mod snapshot_service;
