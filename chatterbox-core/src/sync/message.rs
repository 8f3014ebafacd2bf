// Message model of the sync engine

use crate::protocol::WireMessage;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Shown optimistically, not yet confirmed by the server
    Pending,
    Sent,
    Failed,
}

/// One entry of the active conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, assigned once persisted
    pub id: Option<String>,
    pub client_msg_id: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    /// Optimistic local echo of a send
    pub fn pending(
        client_msg_id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            client_msg_id: Some(client_msg_id.into()),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            body: body.into(),
            created_at: Utc::now(),
            status: MessageStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.status == MessageStatus::Failed
    }

    pub(crate) fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }

    pub(crate) fn has_client_msg_id(&self, client_msg_id: &str) -> bool {
        self.client_msg_id.as_deref() == Some(client_msg_id)
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: Some(wire.id).filter(|id| !id.is_empty()),
            client_msg_id: wire.client_msg_id,
            sender_id: wire.sender,
            receiver_id: wire.receiver,
            body: wire.message,
            // Live echoes may omit the timestamp; arrival time stands in.
            created_at: wire.created_at.unwrap_or_else(Utc::now),
            status: MessageStatus::Sent,
        }
    }
}

/// The two-party conversation currently on screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub peer_id: String,
    /// Set once the server acknowledges the room join
    pub room_id: Option<String>,
}

impl Conversation {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            room_id: None,
        }
    }
}

/// Identifies one activation of a conversation. Results issued under an
/// older epoch are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationEpoch(pub(crate) u64);

impl ConversationEpoch {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Generates `clientMsgId` correlation tokens, unique per session
#[derive(Debug, Default)]
pub struct ClientMsgIdGenerator {
    counter: AtomicU64,
}

impl ClientMsgIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::thread_rng().gen();
        format!(
            "opt_{}_{}_{:08x}",
            Utc::now().timestamp_millis(),
            seq,
            salt
        )
    }
}
