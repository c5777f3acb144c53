use std::time::SystemTime;

use serde::Serialize;
use utoipa::ToSchema;

use crate::dto::format_system_time;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// WebSocket connections currently registered with the coordinator.
    pub connections: usize,
    /// Parties with at least one member in their room.
    pub parties: usize,
    /// RFC 3339 instant of the last successful registry snapshot, if any.
    pub last_snapshot_at: Option<String>,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(connections: usize, parties: usize, last_snapshot_at: Option<SystemTime>) -> Self {
        Self {
            status: "ok".to_string(),
            connections,
            parties,
            last_snapshot_at: last_snapshot_at.map(format_system_time),
        }
    }

    /// Create a health response indicating snapshot persistence is failing.
    pub fn degraded(
        connections: usize,
        parties: usize,
        last_snapshot_at: Option<SystemTime>,
    ) -> Self {
        Self {
            status: "degraded".to_string(),
            connections,
            parties,
            last_snapshot_at: last_snapshot_at.map(format_system_time),
        }
    }
}
