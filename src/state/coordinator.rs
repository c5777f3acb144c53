//! The coordination task: single owner of the registry, the rooms, and the
//! connection table.
//!
//! Connection tasks never touch shared state directly; they send typed
//! commands over an unbounded channel and the coordinator applies them one at
//! a time. Every handler is synchronous, so a command's registry mutation and
//! its broadcast fan-out happen atomically with respect to all other
//! commands: two members can never observe different current orders for
//! longer than one command. Directory lookups and snapshot I/O stay outside,
//! in the tasks that issue the commands.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dto::ws::{
    ChatMessagePayload, JoinRejectReason, MemberStatusPayload, PlayOrderPayload, ServerMessage,
    SyncStatusBroadcast, WebRtcPresencePayload,
};
use crate::error::ServiceError;
use crate::state::registry::{
    LastPosition, MediaKind, MemberStatus, PartySessionRegistry, PlayOrder, RegistrySnapshot,
};
use crate::state::rooms::{ConnId, RoomSet};

/// Write half of one connection as the coordinator sees it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Process-local connection id.
    pub conn_id: ConnId,
    /// Authenticated user behind the connection.
    pub user_id: String,
    /// Display name at connect time, for logs.
    pub username: String,
    /// Channel into the connection's writer task.
    pub sender: mpsc::UnboundedSender<ServerMessage>,
}

/// A join request with the directory's answer already attached.
///
/// The gateway fetches the party before issuing the command so the
/// coordinator never awaits; `membership` is `None` when the party does not
/// exist upstream.
#[derive(Debug)]
pub struct JoinRequest {
    /// Connection asking to join.
    pub conn_id: ConnId,
    /// Party the client wants to enter.
    pub party_id: String,
    /// Member list fetched from the party directory.
    pub membership: Option<Vec<String>>,
    /// Clock offset measured when the join was received.
    pub offset_ms: i64,
}

/// What the coordinator decided about a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The member now sits in the room.
    Accepted {
        /// Whether a current play order was replayed to the joiner.
        replayed_order: bool,
    },
    /// The join was refused and a `joinRejected` frame was pushed.
    Rejected(JoinRejectReason),
}

/// A play wish after gateway validation and timestamp normalization.
#[derive(Debug)]
pub struct PlayWishInput {
    /// Member who issued the wish.
    pub issuer: String,
    /// Party the wish applies to.
    pub party_id: String,
    /// Media item to play.
    pub media_item_id: String,
    /// Whether the item streams from the web or local files.
    pub kind: MediaKind,
    /// Play (true) or pause (false).
    pub is_playing: bool,
    /// Playback position in seconds.
    pub position: f64,
    /// Already rebased onto the server timeline by the gateway.
    pub timestamp: i64,
    /// Ask for the stored resume point of the requested item.
    pub request_last_position: bool,
    /// Resume point of the item the party is switching away from.
    pub reported_last_position: Option<LastPosition>,
}

/// Counters reported by the coordinator for health checks.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorStatus {
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Parties with at least one seated connection.
    pub parties: usize,
}

enum CoordinatorCommand {
    Register(ConnectionHandle),
    Deregister(ConnId),
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<JoinOutcome>,
    },
    Leave {
        conn_id: ConnId,
        party_id: String,
    },
    PlayWish(PlayWishInput),
    SyncStatus {
        party_id: String,
        user_id: String,
        status: MemberStatus,
    },
    Chat(ChatMessagePayload),
    JoinWebRtc(WebRtcPresencePayload),
    LeaveWebRtc(WebRtcPresencePayload),
    PartyUpdate(Value),
    MediaItemUpdate(Value),
    EvictParty {
        party_id: String,
        reply: oneshot::Sender<usize>,
    },
    TakeSnapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
}

/// Cheap cloneable client side of the coordination task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    /// Announce a freshly upgraded connection.
    pub fn register(&self, conn: ConnectionHandle) {
        let _ = self.tx.send(CoordinatorCommand::Register(conn));
    }

    /// Remove a connection and vacate every room seat it held.
    pub fn deregister(&self, conn_id: ConnId) {
        let _ = self.tx.send(CoordinatorCommand::Deregister(conn_id));
    }

    /// Ask to seat a connection in a party room and await the verdict.
    pub async fn join(&self, request: JoinRequest) -> Result<JoinOutcome, ServiceError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(CoordinatorCommand::Join { request, reply })
            .map_err(|_| ServiceError::CoordinatorClosed)?;
        outcome.await.map_err(|_| ServiceError::CoordinatorClosed)
    }

    /// Vacate one room seat. Idempotent.
    pub fn leave(&self, conn_id: ConnId, party_id: String) {
        let _ = self.tx.send(CoordinatorCommand::Leave { conn_id, party_id });
    }

    /// Submit a play wish for arbitration.
    pub fn play_wish(&self, wish: PlayWishInput) {
        let _ = self.tx.send(CoordinatorCommand::PlayWish(wish));
    }

    /// Record one member's progress report and fan out the party map.
    pub fn sync_status(&self, party_id: String, user_id: String, status: MemberStatus) {
        let _ = self.tx.send(CoordinatorCommand::SyncStatus {
            party_id,
            user_id,
            status,
        });
    }

    /// Relay a chat line to its party room.
    pub fn chat(&self, payload: ChatMessagePayload) {
        let _ = self.tx.send(CoordinatorCommand::Chat(payload));
    }

    /// Announce an opened webRTC leg to its party room.
    pub fn join_web_rtc(&self, payload: WebRtcPresencePayload) {
        let _ = self.tx.send(CoordinatorCommand::JoinWebRtc(payload));
    }

    /// Announce a closed webRTC leg to its party room.
    pub fn leave_web_rtc(&self, payload: WebRtcPresencePayload) {
        let _ = self.tx.send(CoordinatorCommand::LeaveWebRtc(payload));
    }

    /// Fan a party metadata hint out to every connection.
    pub fn party_update(&self, payload: Value) {
        let _ = self.tx.send(CoordinatorCommand::PartyUpdate(payload));
    }

    /// Fan a media item metadata hint out to every connection.
    pub fn media_item_update(&self, payload: Value) {
        let _ = self.tx.send(CoordinatorCommand::MediaItemUpdate(payload));
    }

    /// Forget a party that was deleted upstream; returns the seats vacated.
    pub async fn evict_party(&self, party_id: String) -> Result<usize, ServiceError> {
        let (reply, seats) = oneshot::channel();
        self.tx
            .send(CoordinatorCommand::EvictParty { party_id, reply })
            .map_err(|_| ServiceError::CoordinatorClosed)?;
        seats.await.map_err(|_| ServiceError::CoordinatorClosed)
    }

    /// Capture the durable registry subset.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, ServiceError> {
        let (reply, snapshot) = oneshot::channel();
        self.tx
            .send(CoordinatorCommand::TakeSnapshot { reply })
            .map_err(|_| ServiceError::CoordinatorClosed)?;
        snapshot.await.map_err(|_| ServiceError::CoordinatorClosed)
    }

    /// Current connection and party counters.
    pub async fn status(&self) -> Result<CoordinatorStatus, ServiceError> {
        let (reply, status) = oneshot::channel();
        self.tx
            .send(CoordinatorCommand::Status { reply })
            .map_err(|_| ServiceError::CoordinatorClosed)?;
        status.await.map_err(|_| ServiceError::CoordinatorClosed)
    }
}

/// The coordination task state. Constructed once at boot via [`Self::spawn`].
pub struct SyncCoordinator {
    registry: PartySessionRegistry,
    rooms: RoomSet,
    connections: HashMap<ConnId, ConnectionHandle>,
}

impl SyncCoordinator {
    /// Spawn the coordination task around a (possibly restored) registry.
    pub fn spawn(registry: PartySessionRegistry) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            registry,
            rooms: RoomSet::new(),
            connections: HashMap::new(),
        };
        tokio::spawn(coordinator.run(rx));
        CoordinatorHandle { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoordinatorCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!("coordinator loop stopped");
    }

    fn handle(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::Register(conn) => self.handle_register(conn),
            CoordinatorCommand::Deregister(conn_id) => self.handle_deregister(conn_id),
            CoordinatorCommand::Join { request, reply } => self.handle_join(request, reply),
            CoordinatorCommand::Leave { conn_id, party_id } => self.handle_leave(conn_id, &party_id),
            CoordinatorCommand::PlayWish(wish) => self.handle_play_wish(wish),
            CoordinatorCommand::SyncStatus {
                party_id,
                user_id,
                status,
            } => self.handle_sync_status(party_id, user_id, status),
            CoordinatorCommand::Chat(payload) => {
                let party_id = payload.party_id.clone();
                self.broadcast_to_room(&party_id, ServerMessage::ChatMessage(payload));
            }
            CoordinatorCommand::JoinWebRtc(payload) => {
                let party_id = payload.party_id.clone();
                self.broadcast_to_room(&party_id, ServerMessage::JoinWebRtc(payload));
            }
            CoordinatorCommand::LeaveWebRtc(payload) => {
                let party_id = payload.party_id.clone();
                self.broadcast_to_room(&party_id, ServerMessage::LeaveWebRtc(payload));
            }
            CoordinatorCommand::PartyUpdate(payload) => {
                self.broadcast_to_all(ServerMessage::PartyUpdate(payload));
            }
            CoordinatorCommand::MediaItemUpdate(payload) => {
                self.broadcast_to_all(ServerMessage::MediaItemUpdate(payload));
            }
            CoordinatorCommand::EvictParty { party_id, reply } => {
                let _ = reply.send(self.handle_evict(&party_id));
            }
            CoordinatorCommand::TakeSnapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            CoordinatorCommand::Status { reply } => {
                let _ = reply.send(CoordinatorStatus {
                    connections: self.connections.len(),
                    parties: self.rooms.party_count(),
                });
            }
        }
    }

    fn handle_register(&mut self, conn: ConnectionHandle) {
        debug!(conn_id = %conn.conn_id, user = %conn.user_id, "connection registered");
        self.connections.insert(conn.conn_id, conn);
    }

    fn handle_deregister(&mut self, conn_id: ConnId) {
        if self.connections.remove(&conn_id).is_none() {
            return;
        }
        for (party_id, user_id) in self.rooms.purge_connection(conn_id) {
            info!(user = %user_id, party = %party_id, "member left party room (disconnect)");
        }
        debug!(conn_id = %conn_id, "connection deregistered");
    }

    fn handle_join(&mut self, request: JoinRequest, reply: oneshot::Sender<JoinOutcome>) {
        let Some(conn) = self.connections.get(&request.conn_id) else {
            warn!(conn_id = %request.conn_id, "join from unregistered connection");
            return;
        };
        let conn = conn.clone();

        // Duplicate seats are refused before membership is even considered,
        // so a member whose party vanished upstream still hears
        // "alreadyJoined" rather than "notAMember" on a stray re-join.
        if self.rooms.contains_user(&request.party_id, &conn.user_id) {
            info!(
                user = %conn.user_id,
                party = %request.party_id,
                "join refused: already in room"
            );
            self.send_to(
                &conn,
                ServerMessage::JoinRejected {
                    party_id: request.party_id,
                    reason: JoinRejectReason::AlreadyJoined,
                },
            );
            let _ = reply.send(JoinOutcome::Rejected(JoinRejectReason::AlreadyJoined));
            return;
        }

        let is_member = request
            .membership
            .as_ref()
            .is_some_and(|members| members.iter().any(|member| member == &conn.user_id));
        if !is_member {
            info!(
                user = %conn.user_id,
                party = %request.party_id,
                party_found = request.membership.is_some(),
                "join refused: not a member"
            );
            self.send_to(
                &conn,
                ServerMessage::JoinRejected {
                    party_id: request.party_id,
                    reason: JoinRejectReason::NotAMember,
                },
            );
            let _ = reply.send(JoinOutcome::Rejected(JoinRejectReason::NotAMember));
            return;
        }

        self.rooms
            .insert(request.party_id.clone(), conn.conn_id, conn.user_id.clone());
        self.send_to(
            &conn,
            ServerMessage::ServerTimeOffset {
                offset_ms: request.offset_ms,
            },
        );
        let replayed_order = match self.registry.current_order(&request.party_id) {
            Some(order) => {
                self.send_to(&conn, ServerMessage::PlayOrder(order.clone().into()));
                true
            }
            None => false,
        };
        info!(
            user = %conn.user_id,
            party = %request.party_id,
            offset_ms = request.offset_ms,
            replayed_order,
            "member joined party room"
        );
        let _ = reply.send(JoinOutcome::Accepted { replayed_order });
    }

    fn handle_leave(&mut self, conn_id: ConnId, party_id: &str) {
        if let Some(user_id) = self.rooms.remove(party_id, conn_id) {
            info!(user = %user_id, party = %party_id, "member left party room");
        }
    }

    fn handle_play_wish(&mut self, wish: PlayWishInput) {
        // Remember where the previous item was left, but only for real
        // progress; a zero report would clobber a useful resume point.
        if let Some(reported) = &wish.reported_last_position {
            if reported.position > 0.0 {
                self.registry.set_last_position(
                    wish.party_id.clone(),
                    reported.item_id.clone(),
                    reported.position,
                );
            }
        }

        let last_position = if wish.request_last_position {
            self.registry
                .last_position(&wish.party_id, &wish.media_item_id)
                .map(|position| LastPosition {
                    item_id: wish.media_item_id.clone(),
                    position,
                })
        } else {
            None
        };

        let order = PlayOrder {
            issuer: wish.issuer,
            party_id: wish.party_id,
            media_item_id: wish.media_item_id,
            kind: wish.kind,
            is_playing: wish.is_playing,
            position: wish.position,
            timestamp: wish.timestamp,
            last_position,
        };
        self.registry.set_current_order(order.clone());
        debug!(
            party = %order.party_id,
            issuer = %order.issuer,
            item = %order.media_item_id,
            playing = order.is_playing,
            position = order.position,
            "play order replaced"
        );
        let party_id = order.party_id.clone();
        self.broadcast_to_room(&party_id, ServerMessage::PlayOrder(order.into()));
    }

    fn handle_sync_status(&mut self, party_id: String, user_id: String, status: MemberStatus) {
        let members = self
            .registry
            .upsert_status(party_id.clone(), user_id, status);
        let payload: IndexMap<String, MemberStatusPayload> = members
            .iter()
            .map(|(member_id, member_status)| (member_id.clone(), member_status.into()))
            .collect();
        self.broadcast_to_room(
            &party_id,
            ServerMessage::SyncStatus(SyncStatusBroadcast { members: payload }),
        );
    }

    fn handle_evict(&mut self, party_id: &str) -> usize {
        self.registry.evict_party(party_id);
        let seats = self
            .rooms
            .remove_party(party_id)
            .map(|members| members.len())
            .unwrap_or(0);
        info!(party = %party_id, seats, "party evicted");
        seats
    }

    fn send_to(&self, conn: &ConnectionHandle, message: ServerMessage) {
        if conn.sender.send(message).is_err() {
            debug!(conn_id = %conn.conn_id, "dropping message for closed connection");
        }
    }

    fn broadcast_to_room(&self, party_id: &str, message: ServerMessage) {
        let Some(members) = self.rooms.members(party_id) else {
            return;
        };
        for conn_id in members.keys() {
            if let Some(conn) = self.connections.get(conn_id) {
                if conn.sender.send(message.clone()).is_err() {
                    debug!(conn_id = %conn_id, "dropping message for closed connection");
                }
            }
        }
    }

    fn broadcast_to_all(&self, message: ServerMessage) {
        for conn in self.connections.values() {
            if conn.sender.send(message.clone()).is_err() {
                debug!(conn_id = %conn.conn_id, "dropping message for closed connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn spawn() -> CoordinatorHandle {
        SyncCoordinator::spawn(PartySessionRegistry::new())
    }

    fn connect(
        handle: &CoordinatorHandle,
        user: &str,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerMessage>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        handle.register(ConnectionHandle {
            conn_id,
            user_id: user.to_string(),
            username: user.to_string(),
            sender: tx,
        });
        (conn_id, rx)
    }

    async fn join(
        handle: &CoordinatorHandle,
        conn_id: ConnId,
        party: &str,
        members: &[&str],
    ) -> JoinOutcome {
        handle
            .join(JoinRequest {
                conn_id,
                party_id: party.to_string(),
                membership: Some(members.iter().map(|m| m.to_string()).collect()),
                offset_ms: 600,
            })
            .await
            .unwrap()
    }

    fn wish(issuer: &str, party: &str, item: &str, position: f64) -> PlayWishInput {
        PlayWishInput {
            issuer: issuer.to_string(),
            party_id: party.to_string(),
            media_item_id: item.to_string(),
            kind: MediaKind::Web,
            is_playing: true,
            position,
            timestamp: 1_726_000_000_000,
            request_last_position: false,
            reported_last_position: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// All fire-and-forget commands sent before this call are processed once
    /// it returns, because the coordinator handles commands in order.
    async fn barrier(handle: &CoordinatorHandle) {
        handle.status().await.unwrap();
    }

    #[tokio::test]
    async fn accepted_join_pushes_offset_first() {
        let handle = spawn();
        let (conn, mut rx) = connect(&handle, "u1");

        let outcome = join(&handle, conn, "p1", &["u1"]).await;

        assert_eq!(
            outcome,
            JoinOutcome::Accepted {
                replayed_order: false
            }
        );
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::ServerTimeOffset { offset_ms } => assert_eq!(*offset_ms, 600),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn late_joiner_receives_current_order_without_wishing() {
        let handle = spawn();
        let (conn_a, _rx_a) = connect(&handle, "u1");
        join(&handle, conn_a, "p1", &["u1", "u2"]).await;
        handle.play_wish(wish("u1", "p1", "m1", 42.0));
        barrier(&handle).await;

        let (conn_b, mut rx_b) = connect(&handle, "u2");
        let outcome = join(&handle, conn_b, "p1", &["u1", "u2"]).await;

        assert_eq!(
            outcome,
            JoinOutcome::Accepted {
                replayed_order: true
            }
        );
        let messages = drain(&mut rx_b);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ServerMessage::ServerTimeOffset { .. }));
        match &messages[1] {
            ServerMessage::PlayOrder(order) => {
                assert_eq!(order.issuer, "u1");
                assert_eq!(order.media_item_id, "m1");
                assert_eq!(order.position, 42.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn last_processed_wish_wins_for_everyone() {
        let handle = spawn();
        let (conn_a, mut rx_a) = connect(&handle, "u1");
        let (conn_b, mut rx_b) = connect(&handle, "u2");
        join(&handle, conn_a, "p1", &["u1", "u2"]).await;
        join(&handle, conn_b, "p1", &["u1", "u2"]).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle.play_wish(wish("u1", "p1", "m1", 10.0));
        handle.play_wish(wish("u2", "p1", "m1", 99.0));
        barrier(&handle).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let orders: Vec<_> = drain(rx)
                .into_iter()
                .map(|message| match message {
                    ServerMessage::PlayOrder(order) => order,
                    other => panic!("unexpected message: {other:?}"),
                })
                .collect();
            assert_eq!(orders.len(), 2, "issuer included in both fan-outs");
            assert_eq!(orders[1].issuer, "u2");
            assert_eq!(orders[1].position, 99.0);
        }

        // A third member joining now sees only the winning order.
        let (conn_c, mut rx_c) = connect(&handle, "u3");
        join(&handle, conn_c, "p1", &["u1", "u2", "u3"]).await;
        let messages = drain(&mut rx_c);
        match &messages[1] {
            ServerMessage::PlayOrder(order) => assert_eq!(order.issuer, "u2"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_join_is_rejected_and_membership_stays_single() {
        let handle = spawn();
        let (conn_a, mut rx_a) = connect(&handle, "u1");
        join(&handle, conn_a, "p1", &["u1"]).await;
        drain(&mut rx_a);

        // Same user, fresh browser tab.
        let (conn_dup, mut rx_dup) = connect(&handle, "u1");
        let outcome = join(&handle, conn_dup, "p1", &["u1"]).await;

        assert_eq!(
            outcome,
            JoinOutcome::Rejected(JoinRejectReason::AlreadyJoined)
        );
        let rejected = drain(&mut rx_dup);
        assert_eq!(rejected.len(), 1);
        match &rejected[0] {
            ServerMessage::JoinRejected { party_id, reason } => {
                assert_eq!(party_id, "p1");
                assert_eq!(*reason, JoinRejectReason::AlreadyJoined);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // Broadcasts still reach the original seat exactly once.
        handle.chat(ChatMessagePayload {
            party_id: "p1".into(),
            user_id: "u1".into(),
            user_name: "Ana".into(),
            message: "hello".into(),
        });
        barrier(&handle).await;
        let chats = drain(&mut rx_a);
        assert_eq!(chats.len(), 1);
        assert!(drain(&mut rx_dup).is_empty());
    }

    #[tokio::test]
    async fn non_member_and_unknown_party_are_rejected() {
        let handle = spawn();
        let (conn, mut rx) = connect(&handle, "u1");

        let outcome = join(&handle, conn, "p1", &["u2", "u3"]).await;
        assert_eq!(outcome, JoinOutcome::Rejected(JoinRejectReason::NotAMember));

        let outcome = handle
            .join(JoinRequest {
                conn_id: conn,
                party_id: "ghost".into(),
                membership: None,
                offset_ms: 0,
            })
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Rejected(JoinRejectReason::NotAMember));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert!(messages
            .iter()
            .all(|message| matches!(message, ServerMessage::JoinRejected { .. })));
    }

    #[tokio::test]
    async fn last_position_round_trips_through_item_switch() {
        let handle = spawn();
        let (conn, mut rx) = connect(&handle, "u1");
        join(&handle, conn, "p1", &["u1"]).await;
        drain(&mut rx);

        // Switch away from m1 at 120s.
        let mut switch = wish("u1", "p1", "m2", 0.0);
        switch.reported_last_position = Some(LastPosition {
            item_id: "m1".into(),
            position: 120.0,
        });
        handle.play_wish(switch);

        // Come back to m1 asking for the resume point.
        let mut back = wish("u1", "p1", "m1", 0.0);
        back.request_last_position = true;
        handle.play_wish(back);
        barrier(&handle).await;

        let messages = drain(&mut rx);
        match &messages[1] {
            ServerMessage::PlayOrder(order) => {
                let last = order.last_position.as_ref().expect("resume point attached");
                assert_eq!(last.item_id, "m1");
                assert_eq!(last.position, 120.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn inbound_resume_point_is_stripped_unless_requested() {
        let handle = spawn();
        let (conn, mut rx) = connect(&handle, "u1");
        join(&handle, conn, "p1", &["u1"]).await;
        drain(&mut rx);

        let mut carried = wish("u1", "p1", "m2", 0.0);
        carried.reported_last_position = Some(LastPosition {
            item_id: "m1".into(),
            position: 55.0,
        });
        handle.play_wish(carried);
        barrier(&handle).await;

        match &drain(&mut rx)[0] {
            ServerMessage::PlayOrder(order) => assert!(order.last_position.is_none()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_progress_reports_do_not_clobber_resume_points() {
        let handle = spawn();
        let (conn, mut rx) = connect(&handle, "u1");
        join(&handle, conn, "p1", &["u1"]).await;
        drain(&mut rx);

        let mut first = wish("u1", "p1", "m2", 0.0);
        first.reported_last_position = Some(LastPosition {
            item_id: "m1".into(),
            position: 120.0,
        });
        handle.play_wish(first);

        let mut zero = wish("u1", "p1", "m3", 0.0);
        zero.reported_last_position = Some(LastPosition {
            item_id: "m1".into(),
            position: 0.0,
        });
        handle.play_wish(zero);

        let mut back = wish("u1", "p1", "m1", 0.0);
        back.request_last_position = true;
        handle.play_wish(back);
        barrier(&handle).await;

        let messages = drain(&mut rx);
        match &messages[2] {
            ServerMessage::PlayOrder(order) => {
                assert_eq!(
                    order.last_position.as_ref().map(|last| last.position),
                    Some(120.0)
                );
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_report_fans_out_whole_map_to_room() {
        let handle = spawn();
        let (conn_a, mut rx_a) = connect(&handle, "u1");
        let (conn_b, mut rx_b) = connect(&handle, "u2");
        join(&handle, conn_a, "p1", &["u1", "u2"]).await;
        join(&handle, conn_b, "p1", &["u1", "u2"]).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle.sync_status(
            "p1".into(),
            "u1".into(),
            MemberStatus {
                is_playing: true,
                position: 30.0,
                timestamp: 1_726_000_000_000,
                server_time_offset: 600,
                web_rtc_mode: None,
            },
        );
        handle.sync_status(
            "p1".into(),
            "u2".into(),
            MemberStatus {
                is_playing: false,
                position: 29.5,
                timestamp: 1_726_000_000_100,
                server_time_offset: -250,
                web_rtc_mode: Some("audio".into()),
            },
        );
        barrier(&handle).await;

        let updates = drain(&mut rx_a);
        assert_eq!(updates.len(), 2);
        match &updates[1] {
            ServerMessage::SyncStatus(broadcast) => {
                assert_eq!(broadcast.members.len(), 2);
                assert_eq!(broadcast.members["u1"].server_time_offset, 600);
                assert_eq!(broadcast.members["u1"].position, 30.0);
                assert_eq!(broadcast.members["u2"].server_time_offset, -250);
                assert_eq!(broadcast.members["u2"].web_rtc_mode.as_deref(), Some("audio"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
        // The reporter hears its own echo too.
        assert_eq!(drain(&mut rx_b).len(), 2);
    }

    #[tokio::test]
    async fn metadata_updates_reach_connections_outside_the_room() {
        let handle = spawn();
        let (conn_a, mut rx_a) = connect(&handle, "u1");
        let (_conn_b, mut rx_b) = connect(&handle, "u2");
        join(&handle, conn_a, "p1", &["u1"]).await;
        drain(&mut rx_a);

        handle.party_update(serde_json::json!({"partyId": "p1"}));
        handle.media_item_update(serde_json::json!({"mediaItemId": "m1"}));
        barrier(&handle).await;

        assert_eq!(drain(&mut rx_a).len(), 2);
        let for_b = drain(&mut rx_b);
        assert_eq!(for_b.len(), 2);
        assert!(matches!(for_b[0], ServerMessage::PartyUpdate(_)));
        assert!(matches!(for_b[1], ServerMessage::MediaItemUpdate(_)));
    }

    #[tokio::test]
    async fn leave_stops_room_broadcasts_for_that_seat() {
        let handle = spawn();
        let (conn_a, mut rx_a) = connect(&handle, "u1");
        let (conn_b, mut rx_b) = connect(&handle, "u2");
        join(&handle, conn_a, "p1", &["u1", "u2"]).await;
        join(&handle, conn_b, "p1", &["u1", "u2"]).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle.leave(conn_a, "p1".into());
        handle.chat(ChatMessagePayload {
            party_id: "p1".into(),
            user_id: "u2".into(),
            user_name: "Bea".into(),
            message: "still here".into(),
        });
        barrier(&handle).await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn disconnect_purges_every_seat() {
        let handle = spawn();
        let (conn_a, mut rx_a) = connect(&handle, "u1");
        let (conn_b, mut rx_b) = connect(&handle, "u2");
        join(&handle, conn_a, "p1", &["u1", "u2"]).await;
        join(&handle, conn_b, "p1", &["u1", "u2"]).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle.deregister(conn_a);
        handle.chat(ChatMessagePayload {
            party_id: "p1".into(),
            user_id: "u2".into(),
            user_name: "Bea".into(),
            message: "gone?".into(),
        });
        barrier(&handle).await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        // The vacated user can join again without tripping the duplicate guard.
        let (conn_back, _rx_back) = connect(&handle, "u1");
        let outcome = join(&handle, conn_back, "p1", &["u1", "u2"]).await;
        assert!(matches!(outcome, JoinOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn evicted_party_forgets_orders_and_seats() {
        let handle = spawn();
        let (conn, mut rx) = connect(&handle, "u1");
        join(&handle, conn, "p1", &["u1"]).await;
        handle.play_wish(wish("u1", "p1", "m1", 10.0));
        barrier(&handle).await;
        drain(&mut rx);

        let seats = handle.evict_party("p1".into()).await.unwrap();
        assert_eq!(seats, 1);

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.play_orders.is_empty());
        assert!(snapshot.last_positions.is_empty());

        let status = handle.status().await.unwrap();
        assert_eq!(status.parties, 0);

        // Re-joining is a fresh start with no replay.
        let outcome = join(&handle, conn, "p1", &["u1"]).await;
        assert_eq!(
            outcome,
            JoinOutcome::Accepted {
                replayed_order: false
            }
        );
    }

    #[tokio::test]
    async fn snapshot_captures_durable_state_only() {
        let handle = spawn();
        let (conn, _rx) = connect(&handle, "u1");
        join(&handle, conn, "p1", &["u1"]).await;
        let mut with_resume = wish("u1", "p1", "m2", 0.0);
        with_resume.reported_last_position = Some(LastPosition {
            item_id: "m1".into(),
            position: 120.0,
        });
        handle.play_wish(with_resume);
        handle.sync_status(
            "p1".into(),
            "u1".into(),
            MemberStatus {
                is_playing: true,
                position: 1.0,
                timestamp: 0,
                server_time_offset: 0,
                web_rtc_mode: None,
            },
        );
        barrier(&handle).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.play_orders["p1"].media_item_id, "m2");
        assert_eq!(snapshot.last_positions["p1"]["m1"], 120.0);
    }
}
