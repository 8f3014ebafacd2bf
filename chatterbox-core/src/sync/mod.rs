// Message synchronization for the active conversation

pub mod engine;
pub mod message;

pub use engine::MessageSyncEngine;
pub use message::{ClientMsgIdGenerator, Conversation, ConversationEpoch, Message, MessageStatus};

use crate::connection::RealtimeConnectionManager;
use crate::error::ChatResult;
use crate::http::ChatApi;
use crate::protocol::{ClientEvent, OutboundMessage, WireMessage};
use async_trait::async_trait;

/// The slice of the realtime channel the sync engine emits through
pub trait RoomChannel: Send + Sync {
    fn is_connected(&self) -> bool;

    fn join_room(&self, user_id: &str, peer_id: &str) -> ChatResult<()>;

    fn send_message(&self, message: OutboundMessage) -> ChatResult<()>;
}

/// Source of stored conversation history
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn history(&self, self_id: &str, peer_id: &str) -> ChatResult<Vec<WireMessage>>;
}

impl RoomChannel for RealtimeConnectionManager {
    fn is_connected(&self) -> bool {
        RealtimeConnectionManager::is_connected(self)
    }

    fn join_room(&self, user_id: &str, peer_id: &str) -> ChatResult<()> {
        self.emit(ClientEvent::JoinRoom {
            user_id: user_id.to_string(),
            receiver_id: peer_id.to_string(),
        })
    }

    fn send_message(&self, message: OutboundMessage) -> ChatResult<()> {
        self.emit(ClientEvent::SendMessage(message))
    }
}

#[async_trait]
impl HistorySource for ChatApi {
    async fn history(&self, self_id: &str, peer_id: &str) -> ChatResult<Vec<WireMessage>> {
        ChatApi::history(self, self_id, peer_id).await
    }
}
