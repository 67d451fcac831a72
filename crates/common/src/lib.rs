// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between `PeerLink` browser peers and the signaling server.
//! This module defines the WebSocket protocol frames and supporting types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a room as chosen by the clients
pub type RoomId = String;

/// Identifier of a user, unique within a room
pub type UserId = String;

/// Treat an explicit `null` like a missing string
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Enter a room
    /// # Fields
    /// * `room_id` - Room to enter, created on first use
    /// * `user_id` - Identity of the user inside the room
    /// * `username` - Display name shown to the other members
    #[serde(rename_all = "camelCase")]
    Join {
        room_id: RoomId,
        user_id: UserId,
        #[serde(default, deserialize_with = "null_as_empty")]
        username: String,
    },
    /// Session description offer for `target_id`
    Offer(Signal),
    /// Session description answer for `target_id`
    Answer(Signal),
    /// ICE candidate for `target_id`
    IceCandidate(Signal),
    /// Leave the current room
    Leave,
}

impl ClientMessage {
    /// Decode a text frame received from a client.
    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}

/// Kind of handshake payload being relayed between peers
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Wire name of this kind, identical to the frame `type`.
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

/// Targeted handshake payload. Everything besides `targetId` is opaque
/// and relayed verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Signal {
    /// User the payload is addressed to
    #[serde(rename = "targetId")]
    pub target_id: UserId,
    /// Remaining handshake fields (`sdp`, `candidate`, ...)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// A handshake payload as delivered to its target: the sender's fields
/// plus the id of the sending user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RelayedSignal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(rename = "targetId")]
    pub target_id: UserId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(rename = "senderId")]
    pub sender_id: UserId,
}

impl RelayedSignal {
    /// Annotate `signal` with its sender. A client supplied `senderId` is
    /// always replaced by the server-side identity.
    pub fn new(kind: SignalKind, signal: Signal, sender_id: UserId) -> Self {
        let Signal {
            target_id,
            mut fields,
        } = signal;
        fields.remove("senderId");
        Self {
            kind,
            target_id,
            fields,
            sender_id,
        }
    }
}

/// Entry of a room roster
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    /// User id inside the room
    pub id: UserId,
    /// Display name
    pub username: String,
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Current members of the room, sent to a client right after it joined
    Users {
        /// Every other member of the room
        users: Vec<UserSummary>,
    },
    /// Another user entered the room
    #[serde(rename_all = "camelCase")]
    UserJoined {
        /// Id of the new member
        user_id: UserId,
        /// Display name of the new member
        username: String,
    },
    /// Another user left the room
    #[serde(rename_all = "camelCase")]
    UserLeft {
        /// Id of the departed member
        user_id: UserId,
    },
    /// Occupancy of every tracked room, sent only to clients in no room
    RoomCounts {
        /// Room id to member count
        counts: BTreeMap<RoomId, usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_uses_camel_case_fields() {
        let msg = ClientMessage::from_frame(
            r#"{"type":"join","roomId":"lounge","userId":"u1","username":"Ann"}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            ClientMessage::Join {
                room_id: "lounge".to_string(),
                user_id: "u1".to_string(),
                username: "Ann".to_string(),
            }
        );
    }

    #[test]
    fn test_join_without_username_defaults_to_empty() {
        let msg =
            ClientMessage::from_frame(r#"{"type":"join","roomId":"r","userId":"u"}"#).unwrap();
        let ClientMessage::Join { username, .. } = msg else {
            panic!("Expected Join");
        };
        assert!(username.is_empty());
    }

    #[test]
    fn test_join_with_null_username_is_accepted() {
        let msg = ClientMessage::from_frame(
            r#"{"type":"join","roomId":"r","userId":"u","username":null}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                room_id: "r".to_string(),
                user_id: "u".to_string(),
                username: String::new(),
            }
        );
    }

    #[test]
    fn test_signal_keeps_opaque_fields() {
        let msg = ClientMessage::from_frame(
            r#"{"type":"ice-candidate","targetId":"u2","candidate":{"sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();

        let ClientMessage::IceCandidate(signal) = msg else {
            panic!("Expected IceCandidate");
        };
        assert_eq!(signal.target_id, "u2");
        assert_eq!(signal.fields["candidate"]["sdpMid"], "0");
        assert!(!signal.fields.contains_key("type"));
        assert!(!signal.fields.contains_key("targetId"));
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        assert!(ClientMessage::from_frame(r#"{"type":"chat","text":"hi"}"#).is_err());
        assert!(ClientMessage::from_frame("not json").is_err());
        // handshake without a target
        assert!(ClientMessage::from_frame(r#"{"type":"offer","sdp":"x"}"#).is_err());
    }

    #[test]
    fn test_leave_has_no_fields() {
        assert_eq!(
            ClientMessage::from_frame(r#"{"type":"leave"}"#).unwrap(),
            ClientMessage::Leave
        );
    }

    #[test]
    fn test_relayed_signal_appends_sender() {
        let ClientMessage::Offer(signal) = ClientMessage::from_frame(
            r#"{"type":"offer","targetId":"u2","sdp":"v=0","senderId":"forged"}"#,
        )
        .unwrap() else {
            panic!("Expected Offer");
        };

        let relayed = RelayedSignal::new(SignalKind::Offer, signal, "u1".to_string());
        let value = serde_json::to_value(&relayed).unwrap();

        assert_eq!(
            value,
            json!({"type":"offer","targetId":"u2","sdp":"v=0","senderId":"u1"})
        );
    }

    #[test]
    fn test_server_message_wire_format() {
        let joined = serde_json::to_value(ServerMessage::UserJoined {
            user_id: "u2".to_string(),
            username: "Bob".to_string(),
        })
        .unwrap();
        assert_eq!(
            joined,
            json!({"type":"user-joined","userId":"u2","username":"Bob"})
        );

        let left = serde_json::to_value(ServerMessage::UserLeft {
            user_id: "u2".to_string(),
        })
        .unwrap();
        assert_eq!(left, json!({"type":"user-left","userId":"u2"}));

        let counts = serde_json::to_value(ServerMessage::RoomCounts {
            counts: BTreeMap::from([("lounge".to_string(), 2)]),
        })
        .unwrap();
        assert_eq!(counts, json!({"type":"room-counts","counts":{"lounge":2}}));

        let users = serde_json::to_value(ServerMessage::Users {
            users: vec![UserSummary {
                id: "u1".to_string(),
                username: "Ann".to_string(),
            }],
        })
        .unwrap();
        assert_eq!(
            users,
            json!({"type":"users","users":[{"id":"u1","username":"Ann"}]})
        );
    }
}
