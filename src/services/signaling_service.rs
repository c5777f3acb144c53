//! WebRTC signaling relay with directory-backed admission.
//!
//! Peers are anonymous until their first frame: a `hello` claiming a
//! signaling id, due within [`IDENT_TIMEOUT`]. The id is checked against the
//! party directory before the peer may exchange signals. Signal payloads are
//! never inspected, only readdressed.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use dashmap::mapref::entry::Entry;
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::directory::{PartyDirectory, UserDirectory},
    dto::signaling::{SignalForward, SignalingClientMessage, SignalingServerMessage},
    error::ServiceError,
    state::{SharedState, SignalingPeer},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle for an individual signaling WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<SignalingServerMessage>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let payload = match message.to_json_string() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize signaling message, skipping");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "signaling receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("signaling identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let hello = match SignalingClientMessage::from_json_str(&initial_message) {
        Ok(SignalingClientMessage::Hello(hello)) => hello,
        Ok(_) => {
            warn!("first signaling frame was not hello");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to parse signaling hello");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };
    if let Err(err) = hello.validate() {
        warn!(error = %err, "rejecting malformed signaling hello");
        finalize(writer_task, outbound_tx).await;
        return;
    }
    let signaling_id = hello.web_rtc_id;

    let user_id = match authorize(
        state.party_directory(),
        state.user_directory(),
        &signaling_id,
    )
    .await
    {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(id = %signaling_id, error = %err, "signaling peer denied");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    // One claimant per signaling id; a second hello for a live id is denied
    // rather than hijacking the relay target.
    let claimed = match state.signaling_peers().entry(signaling_id.clone()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(vacant) => {
            vacant.insert(SignalingPeer {
                user_id: user_id.clone(),
                tx: outbound_tx.clone(),
            });
            true
        }
    };
    if !claimed {
        warn!(id = %signaling_id, "signaling id already claimed, denying");
        finalize(writer_task, outbound_tx).await;
        return;
    }

    info!(id = %signaling_id, user = %user_id, "signaling peer admitted");
    let _ = outbound_tx.send(SignalingServerMessage::Ready {
        user_id: user_id.clone(),
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match SignalingClientMessage::from_json_str(&text) {
                Ok(SignalingClientMessage::Signal(forward)) => {
                    relay(&state, &signaling_id, forward);
                }
                Ok(SignalingClientMessage::Hello(_)) => {
                    warn!(id = %signaling_id, "ignoring duplicate hello");
                }
                Ok(SignalingClientMessage::Unknown) => {
                    debug!(id = %signaling_id, "ignoring unrecognized signaling frame");
                }
                Err(err) => {
                    warn!(id = %signaling_id, error = %err, "failed to parse signaling frame");
                }
            },
            Ok(Message::Close(_)) => {
                info!(id = %signaling_id, "signaling peer closed");
                break;
            }
            // Pings are answered by the protocol layer.
            Ok(Message::Ping(_)) => {}
            Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {}
            Err(err) => {
                warn!(id = %signaling_id, error = %err, "websocket error");
                break;
            }
        }
    }

    // Deregister only while this connection still owns the id.
    state
        .signaling_peers()
        .remove_if(&signaling_id, |_, peer| peer.tx.same_channel(&outbound_tx));
    info!(id = %signaling_id, user = %user_id, "signaling peer disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Resolve a claimed signaling id to a user via the party directory.
///
/// A party admits the id either through its per-member `webRtcIds` map (the
/// map key is the owning member) or, for parties created before dedicated
/// signaling ids existed, by the id matching a member id directly while the
/// party is active. The legacy path warns on every admission so remaining
/// old-style clients stay visible in the logs. Whatever user the id resolves
/// to must still exist in the user directory.
pub(crate) async fn authorize(
    parties: Arc<dyn PartyDirectory>,
    users: Arc<dyn UserDirectory>,
    signaling_id: &str,
) -> Result<String, ServiceError> {
    let mut resolved = None;
    for party in parties.list_parties().await? {
        if let Some(owner) = party.web_rtc_owner(signaling_id) {
            resolved = Some(owner.to_string());
            break;
        }
        if party.is_active() && party.has_member(signaling_id) {
            warn!(
                party = %party.id,
                id = %signaling_id,
                "admitting signaling peer via legacy member-id match"
            );
            resolved = Some(signaling_id.to_string());
            break;
        }
    }

    let Some(user_id) = resolved else {
        return Err(ServiceError::SignalingDenied(format!(
            "signaling id `{signaling_id}` does not belong to any party"
        )));
    };
    if users.find_user(&user_id).await?.is_none() {
        return Err(ServiceError::SignalingDenied(format!(
            "signaling id `{signaling_id}` resolved to unknown user `{user_id}`"
        )));
    }
    Ok(user_id)
}

/// Readdress one signal frame to its target peer.
fn relay(state: &SharedState, from: &str, forward: SignalForward) {
    if let Err(err) = forward.validate() {
        warn!(from = %from, error = %err, "dropping invalid signal frame");
        return;
    }
    let target = state
        .signaling_peers()
        .get(&forward.to)
        .map(|peer| peer.tx.clone());
    let Some(tx) = target else {
        warn!(from = %from, to = %forward.to, "dropping signal for unknown peer");
        return;
    };
    let delivered = tx.send(SignalingServerMessage::Signal {
        from: from.to_string(),
        data: forward.data,
    });
    if delivered.is_err() {
        warn!(from = %from, to = %forward.to, "signal target writer closed");
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(
    writer_task: JoinHandle<()>,
    outbound_tx: mpsc::UnboundedSender<SignalingServerMessage>,
) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::dao::directory::memory::MemoryDirectory;
    use crate::dao::directory::{PartyRecord, UserRecord};

    async fn directory_with(
        parties: Vec<PartyRecord>,
        users: Vec<&str>,
    ) -> (Arc<dyn PartyDirectory>, Arc<dyn UserDirectory>) {
        let directory = MemoryDirectory::empty();
        for party in parties {
            directory.insert_party(party).await;
        }
        for user in users {
            directory
                .insert_user(UserRecord {
                    id: user.to_string(),
                    username: user.to_string(),
                })
                .await;
        }
        (Arc::new(directory.clone()), Arc::new(directory))
    }

    fn party(id: &str, status: &str, members: &[&str], rtc: &[(&str, &str)]) -> PartyRecord {
        PartyRecord {
            id: id.to_string(),
            members: members.iter().map(|member| member.to_string()).collect(),
            status: status.to_string(),
            web_rtc_ids: rtc
                .iter()
                .map(|(user, rtc_id)| (user.to_string(), rtc_id.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn dedicated_signaling_id_resolves_to_its_owner() {
        let (parties, users) = directory_with(
            vec![party("p1", "active", &["u1"], &[("u1", "rtc-1")])],
            vec!["u1"],
        )
        .await;

        let user_id = authorize(parties, users, "rtc-1").await.unwrap();
        assert_eq!(user_id, "u1");
    }

    #[tokio::test]
    async fn legacy_member_id_is_admitted_while_party_is_active() {
        let (parties, users) =
            directory_with(vec![party("p1", "active", &["u2"], &[])], vec!["u2"]).await;

        let user_id = authorize(parties, users, "u2").await.unwrap();
        assert_eq!(user_id, "u2");
    }

    #[tokio::test]
    async fn legacy_match_requires_active_party() {
        let (parties, users) =
            directory_with(vec![party("p1", "ended", &["u2"], &[])], vec!["u2"]).await;

        let err = authorize(parties, users, "u2").await.unwrap_err();
        assert!(matches!(err, ServiceError::SignalingDenied(_)));
    }

    #[tokio::test]
    async fn unmatched_id_is_denied() {
        let (parties, users) = directory_with(
            vec![party("p1", "active", &["u1"], &[("u1", "rtc-1")])],
            vec!["u1"],
        )
        .await;

        let err = authorize(parties, users, "rtc-unknown").await.unwrap_err();
        assert!(matches!(err, ServiceError::SignalingDenied(_)));
    }

    #[tokio::test]
    async fn resolved_user_must_exist_in_user_directory() {
        // The party still references a user the directory has since deleted.
        let (parties, users) = directory_with(
            vec![party("p1", "active", &["ghost"], &[("ghost", "rtc-9")])],
            vec![],
        )
        .await;

        let err = authorize(parties, users, "rtc-9").await.unwrap_err();
        assert!(matches!(err, ServiceError::SignalingDenied(_)));
    }

    #[tokio::test]
    async fn dedicated_ids_do_not_depend_on_party_status() {
        let (parties, users) = directory_with(
            vec![party("p1", "ended", &["u1"], &[("u1", "rtc-1")])],
            vec!["u1"],
        )
        .await;

        let user_id = authorize(parties, users, "rtc-1").await.unwrap();
        assert_eq!(user_id, "u1");
    }
}
