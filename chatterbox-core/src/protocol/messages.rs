// Chat event payloads carried over the realtime channel

use crate::error::{ChatError, ChatResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const EVENT_JOIN: &str = "join";
pub const EVENT_JOIN_ROOM: &str = "joinRoom";
pub const EVENT_SEND_MESSAGE: &str = "sendMessage";
pub const EVENT_ROOM_JOINED: &str = "roomJoined";
pub const EVENT_RECEIVE_MESSAGE: &str = "receiveMessage";
pub const EVENT_MESSAGE_FAILED: &str = "messageFailed";

/// A persisted message as the server sends it (history and live events)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "_id", default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,

    pub sender: String,

    pub receiver: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WireMessage {
    /// Whether the message was exchanged with `peer_id`
    pub fn involves(&self, peer_id: &str) -> bool {
        self.sender == peer_id || self.receiver == peer_id
    }
}

/// `sendMessage` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub sender: String,
    pub receiver: String,
    pub message: String,
    pub client_msg_id: String,
}

/// Events the client emits
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Presence announcement; routes direct events to this connection
    Join { user_id: String },
    JoinRoom { user_id: String, receiver_id: String },
    SendMessage(OutboundMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => EVENT_JOIN,
            ClientEvent::JoinRoom { .. } => EVENT_JOIN_ROOM,
            ClientEvent::SendMessage(_) => EVENT_SEND_MESSAGE,
        }
    }

    pub fn payload(&self) -> ChatResult<Value> {
        match self {
            ClientEvent::Join { user_id } => Ok(Value::String(user_id.clone())),
            ClientEvent::JoinRoom {
                user_id,
                receiver_id,
            } => Ok(json!({ "userId": user_id, "receiverId": receiver_id })),
            ClientEvent::SendMessage(message) => serde_json::to_value(message)
                .map_err(|e| ChatError::decode(format!("Failed to serialize message: {}", e))),
        }
    }

    /// Events worth holding until the connection is up.
    ///
    /// Room joins are reissued by the sync engine on every connect, so only
    /// sends are held.
    pub fn is_buffered(&self) -> bool {
        matches!(self, ClientEvent::SendMessage(_))
    }
}

/// Chat events the server pushes
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    RoomJoined { room_id: String },
    ReceiveMessage(WireMessage),
    MessageFailed { client_msg_id: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomJoinedPayload {
    room_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageFailedPayload {
    client_msg_id: String,
}

impl ServerEvent {
    /// Parse a named event; `Ok(None)` for event names this client ignores
    pub fn parse(name: &str, payload: Value) -> ChatResult<Option<Self>> {
        let event = match name {
            EVENT_ROOM_JOINED => {
                let p: RoomJoinedPayload = from_payload(name, payload)?;
                ServerEvent::RoomJoined { room_id: p.room_id }
            }
            EVENT_RECEIVE_MESSAGE => ServerEvent::ReceiveMessage(from_payload(name, payload)?),
            EVENT_MESSAGE_FAILED => {
                let p: MessageFailedPayload = from_payload(name, payload)?;
                ServerEvent::MessageFailed {
                    client_msg_id: p.client_msg_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn from_payload<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> ChatResult<T> {
    serde_json::from_value(payload).map_err(|e| ChatError::Decode {
        message: format!("Invalid {} payload: {}", name, e),
        source: Some(Box::new(e)),
    })
}
