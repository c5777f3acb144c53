use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Assemble the health payload from live counters, logging probe failures.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    if let Err(err) = state.snapshot_store().health_check().await {
        warn!(error = %err, "snapshot store health check failed");
    }

    let (connections, parties) = match state.coordinator().status().await {
        Ok(status) => (status.connections, status.parties),
        Err(err) => {
            warn!(error = %err, "coordinator unavailable for health check");
            (0, 0)
        }
    };
    let last_snapshot_at = state.last_snapshot_at().await;

    if state.is_degraded() {
        HealthResponse::degraded(connections, parties, last_snapshot_at)
    } else {
        HealthResponse::ok(connections, parties, last_snapshot_at)
    }
}
