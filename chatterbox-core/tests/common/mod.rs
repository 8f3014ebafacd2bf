// Shared fakes for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use chatterbox_core::auth::{MemorySessionStore, Session, SessionHandle, UserProfile};
use chatterbox_core::error::{ChatError, ChatResult};
use chatterbox_core::http::api::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, REGISTER_PATH, USERS_PATH};
use chatterbox_core::http::{HttpExecutor, HttpMethod, HttpResponse, PreparedRequest};
use chatterbox_core::protocol::{self, EnginePacket, SocketPacket, WireMessage};
use chatterbox_core::sync::HistorySource;
use chatterbox_core::transport::{ChannelTransport, TransportConfig, TransportEvent, TransportLink};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

/// Unsigned token whose `exp` is `exp_offset_secs` from now
pub fn token_for(user_id: &str, exp_offset_secs: i64) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let now = Utc::now().timestamp();
    let claims = json!({
        "id": user_id,
        "iat": now,
        "exp": now + exp_offset_secs,
    });
    format!(
        "{}.{}.c2ln",
        engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        engine.encode(claims.to_string())
    )
}

pub fn profile(user_id: &str) -> UserProfile {
    UserProfile {
        id: user_id.to_string(),
        full_name: format!("User {}", user_id),
        email: format!("{}@chatterbox.test", user_id),
    }
}

/// Session handle already signed in as `user_id`
pub fn signed_in(user_id: &str, token: &str) -> Arc<SessionHandle> {
    let handle = SessionHandle::new(Arc::new(MemorySessionStore::new()));
    let session = Session::from_token(token, Some(&profile(user_id))).expect("valid session");
    handle.establish(session).expect("establish session");
    Arc::new(handle)
}

pub fn wire(id: &str, sender: &str, receiver: &str, body: &str, secs: i64) -> WireMessage {
    WireMessage {
        id: id.to_string(),
        client_msg_id: None,
        sender: sender.to_string(),
        receiver: receiver.to_string(),
        message: body.to_string(),
        created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).single(),
    }
}

/// Poll `cond` until it holds or the wait budget runs out
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub path: String,
    pub bearer: Option<String>,
}

/// In-memory stand-in for the chat REST server
pub struct FakeServer {
    pub user_id: String,
    /// The only bearer token protected routes accept
    pub valid_token: Mutex<String>,
    /// Token handed out by the next refresh; `None` makes refresh fail
    pub next_token: Mutex<Option<String>>,
    pub users: Vec<UserProfile>,
    pub history: Mutex<HashMap<String, Vec<WireMessage>>>,
    pub refresh_delay: Duration,
    /// Whether protected routes accept the token a refresh hands out
    pub accept_refreshed: bool,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeServer {
    pub fn new(user_id: &str, valid_token: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            valid_token: Mutex::new(valid_token.to_string()),
            next_token: Mutex::new(None),
            users: vec![profile(user_id), profile("u2"), profile("u3")],
            history: Mutex::new(HashMap::new()),
            refresh_delay: Duration::from_millis(0),
            accept_refreshed: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_refresh(self, token: &str) -> Self {
        *self.next_token.lock() = Some(token.to_string());
        self
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub fn rejecting_refreshed_tokens(mut self) -> Self {
        self.accept_refreshed = false;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }

    fn respond(&self, request: &PreparedRequest, bearer: Option<&str>) -> HttpResponse {
        match request.path.as_str() {
            REGISTER_PATH => json_response(201, json!({ "message": "registered" })),
            LOGIN_PATH => json_response(
                200,
                json!({
                    "accessToken": self.valid_token.lock().clone(),
                    "user": { "id": self.user_id, "fullName": "Me", "email": "me@chatterbox.test" }
                }),
            ),
            REFRESH_PATH => match self.next_token.lock().clone() {
                Some(token) => {
                    if self.accept_refreshed {
                        *self.valid_token.lock() = token.clone();
                    }
                    json_response(200, json!({ "accessToken": token }))
                }
                None => json_response(401, json!({ "message": "Refresh token expired" })),
            },
            _ if bearer != Some(self.valid_token.lock().as_str()) => {
                json_response(401, json!({ "message": "Unauthorized" }))
            }
            LOGOUT_PATH => json_response(200, json!({ "message": "logged out" })),
            USERS_PATH => json_response(200, json!({ "users": self.users })),
            path => {
                let peer = path.rsplit('/').next().unwrap_or_default().to_string();
                let history = self.history.lock().get(&peer).cloned().unwrap_or_default();
                json_response(200, json!(history))
            }
        }
    }
}

fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

#[async_trait]
impl HttpExecutor for FakeServer {
    async fn execute(&self, request: &PreparedRequest, bearer: Option<&str>) -> ChatResult<HttpResponse> {
        self.calls.lock().push(RecordedCall {
            method: request.method,
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
        });

        if request.path == REFRESH_PATH && !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        Ok(self.respond(request, bearer))
    }
}

// ---------------------------------------------------------------------------
// Realtime transport
// ---------------------------------------------------------------------------

/// Server side of one fake transport connection
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Frame(frame.into()));
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }

    /// Next frame from the client
    pub async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.from_client.recv()).await.ok().flatten()
    }

    pub async fn recv_packet(&mut self) -> EnginePacket {
        let frame = self.recv().await.expect("client frame");
        protocol::decode(&frame).expect("decodable client frame")
    }

    /// Next Socket.IO event from the client
    pub async fn recv_event(&mut self) -> (String, Value) {
        match self.recv_packet().await {
            EnginePacket::Message(SocketPacket::Event { name, payload, .. }) => (name, payload),
            other => panic!("expected event, got {other:?}"),
        }
    }

    /// Send the Engine.IO open packet and return the client's auth object
    pub async fn open(&mut self) -> Value {
        self.send(r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#);
        match self.recv_packet().await {
            EnginePacket::Message(SocketPacket::Connect(Some(auth))) => auth,
            other => panic!("expected CONNECT, got {other:?}"),
        }
    }

    pub fn accept(&self) {
        self.send(r#"40{"sid":"sio-1"}"#);
    }

    pub fn reject(&self, message: &str) {
        self.send(format!("44{}", json!({ "message": message })));
    }

    /// Open, accept, and consume the presence `join`
    pub async fn establish(&mut self) -> Value {
        let auth = self.open().await;
        self.accept();
        let (name, _) = self.recv_event().await;
        assert_eq!(name, "join");
        auth
    }

    pub fn emit(&self, name: &str, payload: Value) {
        self.send(format!("42{}", json!([name, payload])));
    }
}

/// Hands each opened connection's server end to the test
pub struct FakeTransport {
    opened: mpsc::UnboundedSender<ServerEnd>,
    fail_next: Mutex<bool>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (opened, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                opened,
                fail_next: Mutex::new(false),
            }),
            rx,
        )
    }

    pub fn fail_next_open(&self) {
        *self.fail_next.lock() = true;
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn open(&self, _config: &TransportConfig) -> ChatResult<TransportLink> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(ChatError::network("connection refused"));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.opened.send(ServerEnd {
            to_client: in_tx,
            from_client: out_rx,
        });
        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

pub async fn next_connection(opened: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    timeout(WAIT, opened.recv())
        .await
        .expect("transport opened in time")
        .expect("transport open")
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub type HistoryReply = oneshot::Sender<ChatResult<Vec<WireMessage>>>;

/// History source answered by the test, in whatever order it likes
pub struct FakeHistory {
    requests: mpsc::UnboundedSender<(String, HistoryReply)>,
}

impl FakeHistory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, HistoryReply)>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { requests }), rx)
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn history(&self, _self_id: &str, peer_id: &str) -> ChatResult<Vec<WireMessage>> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send((peer_id.to_string(), tx))
            .map_err(|_| ChatError::network("history server gone"))?;
        rx.await
            .map_err(|_| ChatError::network("history request dropped"))?
    }
}

pub async fn next_history_request(
    requests: &mut mpsc::UnboundedReceiver<(String, HistoryReply)>,
) -> (String, HistoryReply) {
    timeout(WAIT, requests.recv())
        .await
        .expect("history requested in time")
        .expect("history request")
}
