use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::directory::Identity,
    dto::ws::{
        ClientMessage, JoinPartyPayload, JoinRejectReason, PlayWishPayload, ServerMessage,
        SyncStatusPayload,
    },
    error::ServiceError,
    services::clock,
    state::{
        SharedState,
        coordinator::{ConnectionHandle, JoinRequest, PlayWishInput},
        registry::MemberStatus,
    },
};

/// Handle the full lifecycle for an individual party WebSocket connection.
///
/// The caller resolved `identity` before the upgrade, so the connection is
/// registered with the coordinator immediately and stays registered until the
/// socket closes.
pub async fn handle_socket(state: SharedState, socket: WebSocket, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let payload = match message.to_json_string() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize outbound message, skipping");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let conn = ConnectionHandle {
        conn_id: Uuid::new_v4(),
        user_id: identity.user_id,
        username: identity.username,
        sender: outbound_tx,
    };
    state.coordinator().register(conn.clone());
    info!(
        conn_id = %conn.conn_id,
        user = %conn.user_id,
        name = %conn.username,
        "party client connected"
    );

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(user = %conn.user_id, payload = %text, "received party message");

                let inbound = match ClientMessage::from_json_str(&text) {
                    Ok(inbound) => inbound,
                    Err(err) => {
                        warn!(user = %conn.user_id, error = %err, "failed to parse party message");
                        continue;
                    }
                };
                if let Err(err) = inbound.validate() {
                    warn!(user = %conn.user_id, error = %err, "dropping invalid party message");
                    continue;
                }
                if let Err(err) = dispatch(&state, &conn, inbound).await {
                    warn!(user = %conn.user_id, error = %err, "terminating connection");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!(user = %conn.user_id, "party client closed");
                break;
            }
            // Pings are answered by the protocol layer.
            Ok(Message::Ping(_)) => {}
            Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {}
            Err(err) => {
                warn!(user = %conn.user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.coordinator().deregister(conn.conn_id);
    info!(conn_id = %conn.conn_id, user = %conn.user_id, "party client disconnected");

    finalize(writer_task, conn).await;
}

/// Route one parsed and validated client message.
///
/// An error here means the coordinator is gone and the connection should be
/// torn down; every per-message failure is logged and swallowed instead.
async fn dispatch(
    state: &SharedState,
    conn: &ConnectionHandle,
    message: ClientMessage,
) -> Result<(), ServiceError> {
    match message {
        ClientMessage::JoinParty(payload) => handle_join(state, conn, payload).await,
        ClientMessage::LeaveParty(payload) => {
            state.coordinator().leave(conn.conn_id, payload.party_id);
            Ok(())
        }
        ClientMessage::PlayWish(payload) => {
            state
                .coordinator()
                .play_wish(wish_input(payload, clock::now_ms()));
            Ok(())
        }
        ClientMessage::SyncStatus(payload) => {
            let status = member_status(&payload, clock::now_ms());
            state
                .coordinator()
                .sync_status(payload.party_id, payload.user_id, status);
            Ok(())
        }
        ClientMessage::ChatMessage(payload) => {
            state.coordinator().chat(payload);
            Ok(())
        }
        ClientMessage::JoinWebRtc(payload) => {
            state.coordinator().join_web_rtc(payload);
            Ok(())
        }
        ClientMessage::LeaveWebRtc(payload) => {
            state.coordinator().leave_web_rtc(payload);
            Ok(())
        }
        ClientMessage::PartyUpdate(value) => {
            state.coordinator().party_update(value);
            Ok(())
        }
        ClientMessage::MediaItemUpdate(value) => {
            state.coordinator().media_item_update(value);
            Ok(())
        }
        ClientMessage::Unknown => {
            debug!(user = %conn.user_id, "ignoring unrecognized message type");
            Ok(())
        }
    }
}

/// Resolve the member list for a join, then hand the verdict to the coordinator.
///
/// The clock offset is measured against receipt time, before directory
/// latency can stretch it. A directory that errors or stalls past the
/// configured timeout rejects the join without touching room state.
async fn handle_join(
    state: &SharedState,
    conn: &ConnectionHandle,
    payload: JoinPartyPayload,
) -> Result<(), ServiceError> {
    let offset_ms = clock::measure_offset_ms(clock::now_ms(), payload.timestamp);

    let lookup = tokio::time::timeout(
        state.config().join_lookup_timeout(),
        state.party_directory().find_party(&payload.party_id),
    )
    .await;
    let membership = match lookup {
        Ok(Ok(party)) => party.map(|party| party.members),
        Ok(Err(err)) => {
            warn!(party = %payload.party_id, error = %err, "party directory lookup failed");
            push_directory_unavailable(conn, payload.party_id);
            return Ok(());
        }
        Err(_) => {
            warn!(party = %payload.party_id, "party directory lookup timed out");
            push_directory_unavailable(conn, payload.party_id);
            return Ok(());
        }
    };

    state
        .coordinator()
        .join(JoinRequest {
            conn_id: conn.conn_id,
            party_id: payload.party_id,
            membership,
            offset_ms,
        })
        .await?;
    Ok(())
}

fn push_directory_unavailable(conn: &ConnectionHandle, party_id: String) {
    let _ = conn.sender.send(ServerMessage::JoinRejected {
        party_id,
        reason: JoinRejectReason::DirectoryUnavailable,
    });
}

/// Rebase a wish onto the server timeline; everything else passes through.
fn wish_input(payload: PlayWishPayload, server_now_ms: i64) -> PlayWishInput {
    PlayWishInput {
        issuer: payload.issuer,
        party_id: payload.party_id,
        media_item_id: payload.media_item_id,
        kind: payload.kind,
        is_playing: payload.is_playing,
        position: payload.position,
        timestamp: clock::normalize_timestamp_ms(payload.timestamp, server_now_ms),
        request_last_position: payload.request_last_position,
        reported_last_position: payload.last_position.map(Into::into),
    }
}

/// Status reports keep their raw client timestamp; only the offset is computed
/// server-side so peers can rebase for themselves.
fn member_status(payload: &SyncStatusPayload, server_now_ms: i64) -> MemberStatus {
    MemberStatus {
        is_playing: payload.is_playing,
        position: payload.position,
        timestamp: payload.timestamp,
        server_time_offset: clock::measure_offset_ms(server_now_ms, payload.timestamp),
        web_rtc_mode: payload.web_rtc.clone(),
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, conn: ConnectionHandle) {
    drop(conn);
    let _ = writer_task.await;
}
