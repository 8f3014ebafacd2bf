//! Message sync engine
//!
//! Keeps the message sequence of the active conversation consistent while
//! history fetches, room joins and live channel events race each other.
//! Admission is decided against the conversation that is active *now*.

use super::message::{ClientMsgIdGenerator, Conversation, ConversationEpoch, Message, MessageStatus};
use super::{HistorySource, RoomChannel};
use crate::connection::ChannelEvent;
use crate::error::{ChatError, ChatResult};
use crate::protocol::{OutboundMessage, WireMessage};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SyncState {
    active: Option<Conversation>,
    epoch: u64,
    messages: Vec<Message>,
    joins_issued: u64,
    joins_acked: u64,
    /// Epoch whose join went out on the current connection
    joined_epoch: Option<u64>,
    connected: bool,
}

impl SyncState {
    fn active_peer(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.peer_id.as_str())
    }
}

pub struct MessageSyncEngine {
    self_id: String,
    channel: Arc<dyn RoomChannel>,
    history: Arc<dyn HistorySource>,
    ids: ClientMsgIdGenerator,
    state: Mutex<SyncState>,
}

impl MessageSyncEngine {
    pub fn new(
        self_id: impl Into<String>,
        channel: Arc<dyn RoomChannel>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        let connected = channel.is_connected();
        Self {
            self_id: self_id.into(),
            channel,
            history,
            ids: ClientMsgIdGenerator::new(),
            state: Mutex::new(SyncState {
                connected,
                ..SyncState::default()
            }),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Snapshot of the active sequence
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.state.lock().active.clone()
    }

    pub fn current_epoch(&self) -> ConversationEpoch {
        ConversationEpoch(self.state.lock().epoch)
    }

    /// Connectivity indicator
    pub fn connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Make `peer_id` the active conversation and start loading its history.
    ///
    /// The returned task resolves once the fetch has been applied or
    /// discarded; dropping it does not cancel the fetch.
    pub fn set_active_conversation(self: &Arc<Self>, peer_id: impl Into<String>) -> JoinHandle<()> {
        let peer_id = peer_id.into();
        let epoch = self.activate(&peer_id);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.load_history(epoch, &peer_id).await;
        })
    }

    /// Synchronous half of a conversation switch: clear the sequence, unset
    /// the room and issue the room join. Returns the new epoch.
    pub fn activate(&self, peer_id: &str) -> ConversationEpoch {
        let epoch = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.active = Some(Conversation::new(peer_id));
            state.messages.clear();
            ConversationEpoch(state.epoch)
        };
        info!("Active conversation is now {} (epoch {})", peer_id, epoch.value());

        self.issue_join(peer_id);
        epoch
    }

    /// Fetch history for `peer_id` and apply it under `epoch`
    pub async fn load_history(&self, epoch: ConversationEpoch, peer_id: &str) {
        match self.history.history(&self.self_id, peer_id).await {
            Ok(list) => {
                let count = list.len();
                if self.on_history_loaded(epoch, list) {
                    debug!("Loaded {} messages for {}", count, peer_id);
                }
            }
            Err(e) => warn!("History fetch for {} failed: {}", peer_id, e),
        }
    }

    /// Optimistically append a message and emit it. Returns its `clientMsgId`.
    pub fn send(&self, body: &str) -> ChatResult<String> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::bad_request("Message body is empty"));
        }

        let (client_msg_id, receiver) = {
            let mut state = self.state.lock();
            let receiver = state
                .active_peer()
                .ok_or_else(|| ChatError::bad_request("No active conversation"))?
                .to_string();
            let client_msg_id = self.ids.next_id();
            state.messages.push(Message::pending(
                client_msg_id.clone(),
                self.self_id.clone(),
                receiver.clone(),
                body,
            ));
            (client_msg_id, receiver)
        };

        let outbound = OutboundMessage {
            sender: self.self_id.clone(),
            receiver,
            message: body.to_string(),
            client_msg_id: client_msg_id.clone(),
        };
        if let Err(e) = self.channel.send_message(outbound) {
            warn!("Send {} refused by channel: {}", client_msg_id, e);
            self.on_message_failed(&client_msg_id);
        }

        Ok(client_msg_id)
    }

    /// Apply a live message. Returns whether the sequence changed.
    pub fn on_inbound_message(&self, wire: WireMessage) -> bool {
        let mut state = self.state.lock();
        let Some(peer) = state.active_peer() else {
            return false;
        };
        if !wire.involves(peer) {
            debug!("Discarding message {} outside the active conversation", wire.id);
            return false;
        }

        let incoming = Message::from(wire);
        let messages = &mut state.messages;

        if let Some(cid) = incoming.client_msg_id.as_deref() {
            if let Some(pos) = messages.iter().position(|m| m.has_client_msg_id(cid)) {
                let status = messages[pos].status;
                match status {
                    MessageStatus::Pending => {
                        let already_present = incoming
                            .id
                            .as_deref()
                            .is_some_and(|id| messages.iter().any(|m| m.has_id(id)));
                        if already_present {
                            messages.remove(pos);
                        } else {
                            messages[pos] = incoming;
                        }
                        return true;
                    }
                    MessageStatus::Failed => {
                        debug!("Ignoring echo for failed message {}", cid);
                        return false;
                    }
                    MessageStatus::Sent => {}
                }
            }
        }

        if let Some(id) = incoming.id.as_deref() {
            if messages.iter().any(|m| m.has_id(id)) {
                debug!("Discarding duplicate message {}", id);
                return false;
            }
        }

        messages.push(incoming);
        true
    }

    /// Mark a pending send failed. Sent and failed entries are left alone.
    pub fn on_message_failed(&self, client_msg_id: &str) -> bool {
        let mut state = self.state.lock();
        match state
            .messages
            .iter_mut()
            .find(|m| m.has_client_msg_id(client_msg_id))
        {
            Some(msg) if msg.is_pending() => {
                msg.status = MessageStatus::Failed;
                warn!("Message {} failed to deliver", client_msg_id);
                true
            }
            _ => false,
        }
    }

    /// Replace the sequence with fetched history, keeping local entries the
    /// history does not cover. Ignored when `epoch` is no longer current.
    pub fn on_history_loaded(&self, epoch: ConversationEpoch, list: Vec<WireMessage>) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch.0 || state.active.is_none() {
            debug!("Discarding history from stale epoch {}", epoch.value());
            return false;
        }

        let mut merged: Vec<Message> = list.into_iter().map(Message::from).collect();
        merged.sort_by_key(|m| m.created_at);

        let mut ids = HashSet::new();
        merged.retain(|m| match &m.id {
            Some(id) => ids.insert(id.clone()),
            None => true,
        });
        let confirmed: HashSet<String> = merged
            .iter()
            .filter_map(|m| m.client_msg_id.clone())
            .collect();

        for local in std::mem::take(&mut state.messages) {
            let keep = match local.status {
                MessageStatus::Pending => local
                    .client_msg_id
                    .as_ref()
                    .map_or(true, |cid| !confirmed.contains(cid)),
                MessageStatus::Failed => true,
                MessageStatus::Sent => local.id.as_ref().map_or(true, |id| !ids.contains(id)),
            };
            if keep {
                let at = merged.partition_point(|m| m.created_at <= local.created_at);
                merged.insert(at, local);
            }
        }

        state.messages = merged;
        true
    }

    /// Record the room of the active conversation once the latest join is
    /// acknowledged; acknowledgements of superseded joins are dropped.
    pub fn on_room_joined(&self, room_id: impl Into<String>) -> bool {
        let room_id = room_id.into();
        let mut state = self.state.lock();
        if state.joins_acked >= state.joins_issued {
            debug!("Ignoring unsolicited room ack {}", room_id);
            return false;
        }
        state.joins_acked += 1;
        if state.joins_acked != state.joins_issued {
            debug!(
                "Ignoring room ack {} ({}/{} joins acknowledged)",
                room_id, state.joins_acked, state.joins_issued
            );
            return false;
        }

        match state.active.as_mut() {
            Some(active) => {
                info!("Joined room {} with {}", room_id, active.peer_id);
                active.room_id = Some(room_id);
                true
            }
            None => false,
        }
    }

    /// Re-join the active room unless its join already went out on this
    /// connection.
    pub fn on_connected(&self) {
        let peer = {
            let mut state = self.state.lock();
            state.connected = true;
            if state.joined_epoch == Some(state.epoch) {
                debug!("Room join for epoch {} already sent", state.epoch);
                return;
            }
            state.joins_issued = 0;
            state.joins_acked = 0;
            state.active_peer().map(str::to_string)
        };

        if let Some(peer) = peer {
            self.issue_join(&peer);
        }
    }

    pub fn on_disconnected(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.joined_epoch = None;
        state.joins_issued = 0;
        state.joins_acked = 0;
    }

    /// Dispatch one channel event
    pub fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.on_connected(),
            ChannelEvent::Disconnected { .. } => self.on_disconnected(),
            ChannelEvent::ConnectError { message } => {
                warn!("Realtime channel rejected: {}", message);
                self.on_disconnected();
            }
            ChannelEvent::RoomJoined { room_id } => {
                self.on_room_joined(room_id);
            }
            ChannelEvent::ReceiveMessage(msg) => {
                self.on_inbound_message(msg);
            }
            ChannelEvent::MessageFailed { client_msg_id } => {
                self.on_message_failed(&client_msg_id);
            }
        }
    }

    /// Consume channel events until the channel is gone
    pub async fn run(&self, mut events: broadcast::Receiver<ChannelEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Sync engine lagged, {} channel events lost", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Channel event stream closed");
    }

    pub fn spawn_event_loop(self: &Arc<Self>, events: broadcast::Receiver<ChannelEvent>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(events).await })
    }

    fn issue_join(&self, peer_id: &str) {
        if !self.channel.is_connected() {
            debug!("Room join for {} deferred until connected", peer_id);
            return;
        }

        let previous = {
            let mut state = self.state.lock();
            state.joins_issued += 1;
            let epoch = state.epoch;
            state.joined_epoch.replace(epoch)
        };
        if let Err(e) = self.channel.join_room(&self.self_id, peer_id) {
            warn!("Room join for {} failed: {}", peer_id, e);
            let mut state = self.state.lock();
            state.joins_issued = state.joins_issued.saturating_sub(1);
            state.joined_epoch = previous;
        }
    }
}
