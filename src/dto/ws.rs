//! Wire protocol for the party synchronization WebSocket.
//!
//! Every frame is a JSON object `{"type": <event>, "data": <payload>}`. The
//! event name lives outside the payload so payloads are free to carry their
//! own `type` field (play orders do, to distinguish web from file media).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::dto::validation::{validate_opaque_id, validate_position};
use crate::state::registry::{LastPosition, MediaKind, MemberStatus, PlayOrder};

#[derive(Debug, Deserialize)]
/// Messages accepted from party WebSocket clients.
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Enter a party room; answered with the clock offset and, when one
    /// exists, the party's current play order.
    JoinParty(JoinPartyPayload),
    /// Leave a party room. Idempotent.
    LeaveParty(LeavePartyPayload),
    /// Request a playback state change for the whole party.
    PlayWish(PlayWishPayload),
    /// Periodic self-report of playback progress.
    SyncStatus(SyncStatusPayload),
    /// Chat line relayed verbatim to the party room.
    ChatMessage(ChatMessagePayload),
    /// Announce that the sender opened a webRTC leg.
    JoinWebRtc(WebRtcPresencePayload),
    /// Announce that the sender closed its webRTC leg.
    LeaveWebRtc(WebRtcPresencePayload),
    /// Opaque cache-invalidation hint for party metadata.
    PartyUpdate(Value),
    /// Opaque cache-invalidation hint for media item metadata.
    MediaItemUpdate(Value),
    /// Anything this build does not understand; logged and dropped.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse a raw text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Validate for ClientMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::JoinParty(payload) => payload.validate(),
            Self::LeaveParty(payload) => payload.validate(),
            Self::PlayWish(payload) => payload.validate(),
            Self::SyncStatus(payload) => payload.validate(),
            Self::ChatMessage(payload) => payload.validate(),
            Self::JoinWebRtc(payload) | Self::LeaveWebRtc(payload) => payload.validate(),
            Self::PartyUpdate(_) | Self::MediaItemUpdate(_) | Self::Unknown => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `joinParty`.
pub struct JoinPartyPayload {
    /// Party the client wants to enter.
    #[validate(custom(function = validate_opaque_id))]
    pub party_id: String,
    /// Client wall clock at send time, epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `leaveParty`.
pub struct LeavePartyPayload {
    /// Party the client is leaving.
    #[validate(custom(function = validate_opaque_id))]
    pub party_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `playWish`: the full intended playback state, not a delta.
pub struct PlayWishPayload {
    /// Member who issued the wish.
    #[validate(custom(function = validate_opaque_id))]
    pub issuer: String,
    /// Party the wish applies to.
    #[validate(custom(function = validate_opaque_id))]
    pub party_id: String,
    /// Media item to play.
    #[validate(custom(function = validate_opaque_id))]
    pub media_item_id: String,
    /// Whether the item streams from the web or local files.
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Play (true) or pause (false).
    pub is_playing: bool,
    /// Playback position in seconds.
    #[validate(custom(function = validate_position))]
    pub position: f64,
    /// Client wall clock at send time, epoch milliseconds.
    pub timestamp: i64,
    /// Ask the server to attach the stored resume point for this item.
    #[serde(default)]
    pub request_last_position: bool,
    /// Resume point of the item the party is switching away from.
    #[validate(nested)]
    pub last_position: Option<LastPositionPayload>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// A remembered playback position for one media item.
pub struct LastPositionPayload {
    /// Media item the position belongs to.
    #[validate(custom(function = validate_opaque_id))]
    pub item_id: String,
    /// Position in seconds.
    #[validate(custom(function = validate_position))]
    pub position: f64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `syncStatus`: one member's self-reported progress.
pub struct SyncStatusPayload {
    /// Party the report applies to.
    #[validate(custom(function = validate_opaque_id))]
    pub party_id: String,
    /// Reporting member.
    #[validate(custom(function = validate_opaque_id))]
    pub user_id: String,
    /// Client wall clock at send time, epoch milliseconds.
    pub timestamp: i64,
    /// Playback position in seconds.
    #[validate(custom(function = validate_position))]
    pub position: f64,
    /// Whether the member's player is currently playing.
    pub is_playing: bool,
    /// WebRTC mode the member advertises, if any.
    pub web_rtc: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `chatMessage`, relayed verbatim.
pub struct ChatMessagePayload {
    /// Party room the line goes to.
    #[validate(custom(function = validate_opaque_id))]
    pub party_id: String,
    /// Author id.
    #[validate(custom(function = validate_opaque_id))]
    pub user_id: String,
    /// Author display name at send time.
    #[validate(length(min = 1, max = 120, message = "user name must be 1-120 characters"))]
    pub user_name: String,
    /// Chat text.
    #[validate(length(min = 1, max = 2000, message = "message must be 1-2000 characters"))]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of `joinWebRtc` / `leaveWebRtc`.
pub struct WebRtcPresencePayload {
    /// Party room the announcement goes to.
    #[validate(custom(function = validate_opaque_id))]
    pub party_id: String,
    /// The announcing member's signaling id.
    #[validate(custom(function = validate_opaque_id))]
    pub web_rtc_id: String,
}

#[derive(Debug, Clone, Serialize)]
/// Messages pushed to party WebSocket clients.
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Difference between the server clock and the client clock that sent
    /// the triggering `joinParty`.
    #[serde(rename_all = "camelCase")]
    ServerTimeOffset {
        /// Milliseconds to add to the client clock to obtain server time.
        offset_ms: i64,
    },
    /// The party's authoritative playback intent.
    PlayOrder(PlayOrderPayload),
    /// Full progress map for a party, keyed by member id.
    SyncStatus(SyncStatusBroadcast),
    /// Chat line from another member (or the sender's own echo).
    ChatMessage(ChatMessagePayload),
    /// A member opened a webRTC leg.
    JoinWebRtc(WebRtcPresencePayload),
    /// A member closed its webRTC leg.
    LeaveWebRtc(WebRtcPresencePayload),
    /// Party metadata changed upstream; re-fetch if interested.
    PartyUpdate(Value),
    /// Media item metadata changed upstream; re-fetch if interested.
    MediaItemUpdate(Value),
    /// A `joinParty` was refused; the connection stays open.
    #[serde(rename_all = "camelCase")]
    JoinRejected {
        /// Party the rejected join targeted.
        party_id: String,
        /// Why the join was refused.
        reason: JoinRejectReason,
    },
}

impl ServerMessage {
    /// Serialize for the socket writer.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Authoritative playback intent broadcast to a party room.
pub struct PlayOrderPayload {
    /// Member whose wish produced this order.
    pub issuer: String,
    /// Party the order applies to.
    pub party_id: String,
    /// Media item to play.
    pub media_item_id: String,
    /// Whether the item streams from the web or local files.
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Play (true) or pause (false).
    pub is_playing: bool,
    /// Playback position in seconds.
    pub position: f64,
    /// Server-normalized timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// Stored resume point, present only when the wish requested it and one
    /// was on file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_position: Option<LastPositionPayload>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Full progress map for a party.
pub struct SyncStatusBroadcast {
    /// Latest report per member, in first-report order.
    pub members: IndexMap<String, MemberStatusPayload>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// One member's progress as other members see it.
pub struct MemberStatusPayload {
    /// Whether the member's player is currently playing.
    pub is_playing: bool,
    /// Playback position in seconds.
    pub position: f64,
    /// The member's own wall clock for the report, epoch milliseconds.
    pub timestamp: i64,
    /// Offset from that member's clock to server time, milliseconds.
    pub server_time_offset: i64,
    /// WebRTC mode the member advertises, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_rtc_mode: Option<String>,
}

impl From<PlayOrder> for PlayOrderPayload {
    fn from(order: PlayOrder) -> Self {
        Self {
            issuer: order.issuer,
            party_id: order.party_id,
            media_item_id: order.media_item_id,
            kind: order.kind,
            is_playing: order.is_playing,
            position: order.position,
            timestamp: order.timestamp,
            last_position: order.last_position.map(Into::into),
        }
    }
}

impl From<LastPosition> for LastPositionPayload {
    fn from(last: LastPosition) -> Self {
        Self {
            item_id: last.item_id,
            position: last.position,
        }
    }
}

impl From<LastPositionPayload> for LastPosition {
    fn from(payload: LastPositionPayload) -> Self {
        Self {
            item_id: payload.item_id,
            position: payload.position,
        }
    }
}

impl From<&MemberStatus> for MemberStatusPayload {
    fn from(status: &MemberStatus) -> Self {
        Self {
            is_playing: status.is_playing,
            position: status.position,
            timestamp: status.timestamp,
            server_time_offset: status.server_time_offset,
            web_rtc_mode: status.web_rtc_mode.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Why a `joinParty` was refused.
pub enum JoinRejectReason {
    /// The user already sits in this party's room.
    AlreadyJoined,
    /// The party does not exist or the user is not in its member list.
    NotAMember,
    /// The party directory could not answer in time.
    DirectoryUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_party() {
        let msg = ClientMessage::from_json_str(
            r#"{"type":"joinParty","data":{"partyId":"p1","timestamp":1726000000000}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::JoinParty(payload) => {
                assert_eq!(payload.party_id, "p1");
                assert_eq!(payload.timestamp, 1_726_000_000_000);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_play_wish_with_media_type_field() {
        let msg = ClientMessage::from_json_str(
            r#"{"type":"playWish","data":{
                "issuer":"u1","partyId":"p1","mediaItemId":"m1","type":"web",
                "isPlaying":true,"position":12.5,"timestamp":1726000000000,
                "requestLastPosition":true,
                "lastPosition":{"itemId":"m0","position":120.0}
            }}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::PlayWish(wish) => {
                assert_eq!(wish.kind, MediaKind::Web);
                assert!(wish.request_last_position);
                let last = wish.last_position.unwrap();
                assert_eq!(last.item_id, "m0");
                assert_eq!(last.position, 120.0);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn play_wish_defaults_request_last_position_off() {
        let msg = ClientMessage::from_json_str(
            r#"{"type":"playWish","data":{
                "issuer":"u1","partyId":"p1","mediaItemId":"m1","type":"file",
                "isPlaying":false,"position":0.0,"timestamp":1
            }}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::PlayWish(wish) => {
                assert!(!wish.request_last_position);
                assert!(wish.last_position.is_none());
                assert_eq!(wish.kind, MediaKind::File);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_type_maps_to_unknown() {
        let msg =
            ClientMessage::from_json_str(r#"{"type":"teleport","data":{"anywhere":true}}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn rejects_play_wish_with_negative_position() {
        let msg = ClientMessage::from_json_str(
            r#"{"type":"playWish","data":{
                "issuer":"u1","partyId":"p1","mediaItemId":"m1","type":"web",
                "isPlaying":true,"position":-3.0,"timestamp":1
            }}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::PlayWish(wish) => assert!(wish.validate().is_err()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_blank_party_id() {
        let payload = JoinPartyPayload {
            party_id: "   ".into(),
            timestamp: 0,
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn enum_validation_reaches_inner_payload() {
        let msg = ClientMessage::from_json_str(
            r#"{"type":"chatMessage","data":{"partyId":"p1","userId":"u1","userName":"Ana","message":""}}"#,
        )
        .unwrap();
        assert!(msg.validate().is_err());

        let msg = ClientMessage::from_json_str(r#"{"type":"partyUpdate","data":{"partyId":"p1"}}"#)
            .unwrap();
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn serializes_play_order_with_wire_field_names() {
        let order = ServerMessage::PlayOrder(PlayOrderPayload {
            issuer: "u1".into(),
            party_id: "p1".into(),
            media_item_id: "m1".into(),
            kind: MediaKind::Web,
            is_playing: true,
            position: 42.0,
            timestamp: 1_726_000_000_000,
            last_position: None,
        });
        let json: Value = serde_json::from_str(&order.to_json_string().unwrap()).unwrap();

        assert_eq!(json["type"], "playOrder");
        assert_eq!(json["data"]["partyId"], "p1");
        assert_eq!(json["data"]["mediaItemId"], "m1");
        assert_eq!(json["data"]["type"], "web");
        assert_eq!(json["data"]["isPlaying"], true);
        assert!(json["data"].get("lastPosition").is_none());
    }

    #[test]
    fn serializes_sync_status_map_with_offsets() {
        let mut members = IndexMap::new();
        members.insert(
            "u1".to_string(),
            MemberStatusPayload {
                is_playing: true,
                position: 30.0,
                timestamp: 999,
                server_time_offset: 600,
                web_rtc_mode: None,
            },
        );
        let msg = ServerMessage::SyncStatus(SyncStatusBroadcast { members });
        let json: Value = serde_json::from_str(&msg.to_json_string().unwrap()).unwrap();

        assert_eq!(json["type"], "syncStatus");
        assert_eq!(json["data"]["members"]["u1"]["serverTimeOffset"], 600);
        assert!(json["data"]["members"]["u1"].get("webRtcMode").is_none());
    }

    #[test]
    fn serializes_join_rejected_reasons_in_camel_case() {
        let msg = ServerMessage::JoinRejected {
            party_id: "p1".into(),
            reason: JoinRejectReason::DirectoryUnavailable,
        };
        let json: Value = serde_json::from_str(&msg.to_json_string().unwrap()).unwrap();

        assert_eq!(json["type"], "joinRejected");
        assert_eq!(json["data"]["reason"], "directoryUnavailable");
    }
}
