//! Realtime connection manager
//!
//! Owns the one channel handle of a signed-in session, runs the Socket.IO
//! handshake over a [`ChannelTransport`], and republishes the chat events
//! the rest of the client cares about.

use super::state_machine::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
use crate::auth::SessionHandle;
use crate::error::{ChatError, ChatResult};
use crate::logging::redact_token;
use crate::protocol::{self, ClientEvent, EnginePacket, ServerEvent, SocketPacket, WireMessage};
use crate::transport::{ChannelTransport, TransportConfig, TransportEvent};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Events republished to subscribers: three chat events plus lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: Option<String> },
    /// The handshake failed; the connection is now `AuthFailed`
    ConnectError { message: String },
    RoomJoined { room_id: String },
    ReceiveMessage(WireMessage),
    MessageFailed { client_msg_id: String },
}

impl From<ServerEvent> for ChannelEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::RoomJoined { room_id } => ChannelEvent::RoomJoined { room_id },
            ServerEvent::ReceiveMessage(msg) => ChannelEvent::ReceiveMessage(msg),
            ServerEvent::MessageFailed { client_msg_id } => ChannelEvent::MessageFailed { client_msg_id },
        }
    }
}

/// The session's single channel handle.
///
/// Holds the handshake credential and, while connected, the outbound side of
/// the transport. Sends issued while not connected wait in `buffer`.
#[derive(Debug)]
pub struct ChannelHandle {
    credential: RwLock<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    buffer: Mutex<VecDeque<String>>,
}

impl ChannelHandle {
    fn new(credential: Option<String>) -> Self {
        Self {
            credential: RwLock::new(credential),
            outbound: Mutex::new(None),
            buffer: Mutex::new(VecDeque::new()),
        }
    }

    /// Token presented on the next handshake
    pub fn credential(&self) -> Option<String> {
        self.credential.read().clone()
    }

    /// Frames waiting for the connection
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    fn set_credential(&self, token: Option<String>) -> bool {
        let mut credential = self.credential.write();
        if *credential == token {
            return false;
        }
        *credential = token;
        true
    }

    fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        *self.outbound.lock() = Some(outbound);
    }

    fn detach(&self) {
        self.outbound.lock().take();
    }

    /// Hand the frame back if there is no live transport
    fn send(&self, frame: String) -> Result<(), String> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(frame).map_err(|e| e.0),
            None => Err(frame),
        }
    }

    fn hold(&self, frame: String) {
        self.buffer.lock().push_back(frame);
    }

    fn flush(&self) {
        let frames: Vec<String> = self.buffer.lock().drain(..).collect();
        if frames.is_empty() {
            return;
        }
        debug!("Flushing {} buffered frames", frames.len());
        for (idx, frame) in frames.iter().enumerate() {
            if let Err(frame) = self.send(frame.clone()) {
                // Transport went away mid-flush; keep the rest in order.
                let mut buffer = self.buffer.lock();
                for pending in frames[idx + 1..].iter().rev() {
                    buffer.push_front(pending.clone());
                }
                buffer.push_front(frame);
                return;
            }
        }
    }
}

enum Flow {
    Continue,
    Stop(Option<String>),
}

pub struct RealtimeConnectionManager {
    config: TransportConfig,
    transport: Arc<dyn ChannelTransport>,
    session: Arc<SessionHandle>,
    state: ConnectionStateMachine,
    channel: Mutex<Option<Arc<ChannelHandle>>>,
    generation: watch::Sender<u64>,
    events: broadcast::Sender<ChannelEvent>,
}

impl RealtimeConnectionManager {
    pub fn new(
        config: TransportConfig,
        transport: Arc<dyn ChannelTransport>,
        session: Arc<SessionHandle>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            config,
            transport,
            session,
            state: ConnectionStateMachine::new(),
            channel: Mutex::new(None),
            generation,
            events,
        }
    }

    /// Get connection state
    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state_machine(&self) -> &ConnectionStateMachine {
        &self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// The channel handle, created on first use with the current token.
    ///
    /// When the session token has changed since the handle was created the
    /// credential is swapped in place. A live connection keeps running and
    /// presents the new credential on its next handshake; a disconnected
    /// channel reconnects with it right away.
    pub fn get_channel(self: &Arc<Self>) -> Arc<ChannelHandle> {
        let (channel, changed) = self.current_channel();
        if changed && channel.credential().is_some() && self.state() == ConnectionState::Disconnected {
            if let Err(e) = self.connect() {
                warn!("Reconnect with refreshed credential failed: {}", e);
            }
        }
        channel
    }

    /// Returns the handle and whether its credential changed
    fn current_channel(&self) -> (Arc<ChannelHandle>, bool) {
        let token = self.session.access_token();
        let mut slot = self.channel.lock();

        match slot.as_ref() {
            Some(channel) => {
                let changed = channel.set_credential(token.clone());
                if changed {
                    info!(
                        "Handshake credential updated ({})",
                        token.as_deref().map(redact_token).unwrap_or_default()
                    );
                }
                (Arc::clone(channel), changed)
            }
            None => {
                let channel = Arc::new(ChannelHandle::new(token));
                *slot = Some(Arc::clone(&channel));
                (channel, false)
            }
        }
    }

    /// Start connecting. Returns immediately; progress is reported through
    /// [`ChannelEvent`]s. Calling it while connecting or connected is a no-op.
    pub fn connect(self: &Arc<Self>) -> ChatResult<()> {
        let (channel, _) = self.current_channel();
        if channel.credential().is_none() {
            return Err(ChatError::ChannelAuthRejected {
                message: "no access token for handshake".to_string(),
            });
        }

        if self.state.apply(ConnectionEvent::Connect).is_none() {
            debug!("connect() ignored in state {:?}", self.state());
            return Ok(());
        }

        let mut generation = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_connection(channel, generation).await;
        });
        Ok(())
    }

    /// Close the connection. Buffered sends stay buffered.
    pub fn disconnect(&self) {
        self.generation.send_modify(|g| *g += 1);
        if let Some(channel) = self.channel.lock().as_ref() {
            channel.detach();
        }
        if self.state.apply(ConnectionEvent::Disconnect).is_some() {
            self.publish(ChannelEvent::Disconnected {
                reason: Some("client disconnect".to_string()),
            });
        }
    }

    /// Emit a chat event.
    ///
    /// Sends are held while the channel is down and flushed after the next
    /// handshake; other events fail with a network error instead.
    pub fn emit(&self, event: ClientEvent) -> ChatResult<()> {
        let frame = protocol::encode(&EnginePacket::Message(SocketPacket::event(
            event.name(),
            event.payload()?,
        )))?;
        let (channel, _) = self.current_channel();

        let frame = if self.is_connected() {
            match channel.send(frame) {
                Ok(()) => return Ok(()),
                Err(frame) => frame,
            }
        } else {
            frame
        };

        if event.is_buffered() {
            debug!("Channel down, holding {} until connected", event.name());
            channel.hold(frame);
            Ok(())
        } else {
            Err(ChatError::network(format!(
                "Realtime channel not connected, dropped {}",
                event.name()
            )))
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.borrow() == generation
    }

    fn publish(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn run_connection(self: Arc<Self>, channel: Arc<ChannelHandle>, generation: u64) {
        let link = match self.transport.open(&self.config).await {
            Ok(link) => link,
            Err(e) => {
                warn!("Realtime transport failed to open: {}", e);
                self.finish(&channel, generation, Some(e.to_string()));
                return;
            }
        };

        let mut generation_rx = self.generation.subscribe();
        let outbound = link.outbound;
        let mut inbound = link.inbound;
        let mut reason = None;

        while self.is_current(generation) {
            let event = tokio::select! {
                event = inbound.recv() => event,
                _ = generation_rx.changed() => break,
            };

            match event {
                Some(TransportEvent::Frame(text)) => match protocol::decode(&text) {
                    Ok(packet) => {
                        if let Flow::Stop(why) = self.handle_packet(&channel, &outbound, packet) {
                            reason = why;
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring undecodable frame: {}", e),
                },
                Some(TransportEvent::Closed { reason: why }) => {
                    reason = why;
                    break;
                }
                None => break,
            }
        }

        self.finish(&channel, generation, reason);
    }

    fn handle_packet(
        &self,
        channel: &ChannelHandle,
        outbound: &mpsc::UnboundedSender<String>,
        packet: EnginePacket,
    ) -> Flow {
        match packet {
            EnginePacket::Open(open) => {
                debug!("Engine session opened: sid={}", open.sid);
                let auth = json!({ "token": channel.credential() });
                self.send_raw(outbound, EnginePacket::Message(SocketPacket::Connect(Some(auth))));
                Flow::Continue
            }
            EnginePacket::Ping(data) => {
                self.send_raw(outbound, EnginePacket::Pong(data));
                Flow::Continue
            }
            EnginePacket::Close => Flow::Stop(Some("server closed".to_string())),
            EnginePacket::Message(SocketPacket::Connect(_)) => {
                channel.attach(outbound.clone());
                if self.state.apply(ConnectionEvent::HandshakeAccepted).is_some() {
                    info!("Realtime channel connected");
                    self.publish(ChannelEvent::Connected);
                    self.announce_presence();
                    channel.flush();
                }
                Flow::Continue
            }
            EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("handshake rejected")
                    .to_string();
                warn!("Realtime handshake rejected: {}", message);
                if self.state.apply(ConnectionEvent::HandshakeRejected).is_some() {
                    self.publish(ChannelEvent::ConnectError { message: message.clone() });
                }
                Flow::Stop(Some(message))
            }
            EnginePacket::Message(SocketPacket::Disconnect) => {
                Flow::Stop(Some("server disconnect".to_string()))
            }
            EnginePacket::Message(SocketPacket::Event { name, payload, .. }) => {
                match ServerEvent::parse(&name, payload) {
                    Ok(Some(event)) => self.publish(event.into()),
                    Ok(None) => debug!("Ignoring event {}", name),
                    Err(e) => warn!("Dropping malformed {} event: {}", name, e),
                }
                Flow::Continue
            }
            other => {
                debug!("Ignoring packet {:?}", other);
                Flow::Continue
            }
        }
    }

    fn announce_presence(&self) {
        match self.session.user_id() {
            Some(user_id) => {
                if let Err(e) = self.emit(ClientEvent::Join { user_id }) {
                    warn!("Presence announcement failed: {}", e);
                }
            }
            None => warn!("Connected without a signed-in user, skipping presence"),
        }
    }

    fn send_raw(&self, outbound: &mpsc::UnboundedSender<String>, packet: EnginePacket) {
        match protocol::encode(&packet) {
            Ok(frame) => {
                if outbound.send(frame).is_err() {
                    debug!("Transport closed before {:?} could be sent", packet);
                }
            }
            Err(e) => warn!("Failed to encode {:?}: {}", packet, e),
        }
    }

    fn finish(&self, channel: &ChannelHandle, generation: u64, reason: Option<String>) {
        if !self.is_current(generation) {
            return;
        }
        channel.detach();
        if self.state.apply(ConnectionEvent::TransportDropped).is_some() {
            info!("Realtime channel disconnected: {:?}", reason);
            self.publish(ChannelEvent::Disconnected { reason });
        }
    }
}
