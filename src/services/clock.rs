//! Clock-offset reconciliation between client wall clocks and server time.
//!
//! Clients stamp every message with their local wall clock. The offset between
//! that clock and ours is measured per message and either stored alongside the
//! member's status (so other clients can translate it) or applied directly to
//! rebase a timestamp onto the server timeline. All functions take the server
//! time as a parameter; only [`now_ms`] touches the system clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current server time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Offset to add to a client timestamp to land on the server timeline.
///
/// Positive when the client clock lags the server, negative when it runs
/// ahead. The measurement absorbs one-way transit delay; for LAN-scale
/// deployments that error stays well under the sync tolerance.
pub fn measure_offset_ms(server_now_ms: i64, client_timestamp_ms: i64) -> i64 {
    server_now_ms - client_timestamp_ms
}

/// Rebase a client timestamp onto the server timeline.
///
/// Equivalent to stamping the message with the server receipt time, which is
/// exactly what downstream consumers treat it as.
pub fn normalize_timestamp_ms(client_timestamp_ms: i64, server_now_ms: i64) -> i64 {
    client_timestamp_ms + measure_offset_ms(server_now_ms, client_timestamp_ms)
}
