//! Wire protocol for the webRTC signaling relay socket.
//!
//! Same envelope as the party socket: `{"type": <event>, "data": <payload>}`.
//! Signal payloads (SDP offers, ICE candidates) are opaque to the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::validate_opaque_id;

#[derive(Debug, Deserialize)]
/// Messages accepted from signaling peers.
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SignalingClientMessage {
    /// Mandatory first frame: claim a signaling identity.
    Hello(SignalingHello),
    /// Forward a payload to another admitted peer.
    Signal(SignalForward),
    /// Anything this build does not understand; logged and dropped.
    #[serde(other)]
    Unknown,
}

impl SignalingClientMessage {
    /// Parse a raw text frame.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of the signaling `hello` handshake.
pub struct SignalingHello {
    /// Signaling id the peer claims; checked against the party directory.
    #[validate(custom(function = validate_opaque_id))]
    pub web_rtc_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Payload of an inbound `signal` frame.
pub struct SignalForward {
    /// Signaling id of the target peer.
    #[validate(custom(function = validate_opaque_id))]
    pub to: String,
    /// Opaque SDP or ICE payload, relayed untouched.
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
/// Messages pushed to signaling peers.
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SignalingServerMessage {
    /// The peer passed authorization and may start exchanging signals.
    #[serde(rename_all = "camelCase")]
    Ready {
        /// User the signaling id resolved to.
        user_id: String,
    },
    /// A payload from another peer.
    #[serde(rename_all = "camelCase")]
    Signal {
        /// Signaling id of the sender.
        from: String,
        /// Opaque SDP or ICE payload, relayed untouched.
        data: Value,
    },
}

impl SignalingServerMessage {
    /// Serialize for the socket writer.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hello() {
        let msg = SignalingClientMessage::from_json_str(
            r#"{"type":"hello","data":{"webRtcId":"peer-1"}}"#,
        )
        .unwrap();
        match msg {
            SignalingClientMessage::Hello(hello) => assert_eq!(hello.web_rtc_id, "peer-1"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_signal_with_opaque_data() {
        let msg = SignalingClientMessage::from_json_str(
            r#"{"type":"signal","data":{"to":"peer-2","data":{"sdp":"v=0..."}}}"#,
        )
        .unwrap();
        match msg {
            SignalingClientMessage::Signal(forward) => {
                assert_eq!(forward.to, "peer-2");
                assert_eq!(forward.data["sdp"], "v=0...");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_maps_to_unknown() {
        let msg = SignalingClientMessage::from_json_str(r#"{"type":"goodbye","data":{}}"#).unwrap();
        assert!(matches!(msg, SignalingClientMessage::Unknown));
    }

    #[test]
    fn serializes_relayed_signal_with_sender() {
        let msg = SignalingServerMessage::Signal {
            from: "peer-1".into(),
            data: serde_json::json!({"candidate": "a=..."}),
        };
        let json: Value = serde_json::from_str(&msg.to_json_string().unwrap()).unwrap();

        assert_eq!(json["type"], "signal");
        assert_eq!(json["data"]["from"], "peer-1");
        assert_eq!(json["data"]["data"]["candidate"], "a=...");
    }
}
