//! Chat client
//!
//! [`ChatClient`] is the long-lived entry point: it owns the stored session
//! and the REST client. Each login yields a [`ChatSession`] that owns the
//! realtime connection and the sync engine for as long as the user stays
//! signed in.

pub mod config;

pub use config::{ClientConfig, ClientConfigBuilder};

use crate::auth::{
    Session, SessionEvent, SessionHandle, SessionStore, TokenRefreshCoordinator, UserProfile,
};
use crate::connection::{ConnectionState, RealtimeConnectionManager};
use crate::error::{ChatError, ChatResult};
use crate::http::{
    ChatApi, ChatHttpClient, HttpExecutor, HttpTokenRefresher, LoginRequest, RegisterRequest,
    ReqwestExecutor,
};
use crate::logging::session_span;
use crate::sync::{Conversation, Message, MessageSyncEngine, RoomChannel};
use crate::transport::{ChannelTransport, WebSocketTransport};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

const SESSION_EVENT_CAPACITY: usize = 32;

pub struct ChatClient {
    config: ClientConfig,
    session: Arc<SessionHandle>,
    events: broadcast::Sender<SessionEvent>,
    api: ChatApi,
    transport: Arc<dyn ChannelTransport>,
}

impl ChatClient {
    /// Client over `reqwest` and a WebSocket transport
    pub fn new(config: ClientConfig, store: Arc<dyn SessionStore>) -> ChatResult<Self> {
        let executor: Arc<dyn HttpExecutor> = Arc::new(ReqwestExecutor::new(config.http.clone())?);
        Ok(Self::with_parts(
            config,
            store,
            executor,
            Arc::new(WebSocketTransport::new()),
        ))
    }

    /// Client over caller-supplied HTTP and realtime plumbing
    pub fn with_parts(
        config: ClientConfig,
        store: Arc<dyn SessionStore>,
        executor: Arc<dyn HttpExecutor>,
        transport: Arc<dyn ChannelTransport>,
    ) -> Self {
        let session = Arc::new(SessionHandle::new(store));
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        let refresher = Arc::new(HttpTokenRefresher::new(Arc::clone(&executor)));
        let refresh = Arc::new(TokenRefreshCoordinator::new(
            refresher,
            Arc::clone(&session),
            events.clone(),
        ));
        let http = Arc::new(ChatHttpClient::new(executor, Arc::clone(&session), refresh));

        Self {
            config,
            session,
            events,
            api: ChatApi::new(http),
            transport,
        }
    }

    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    /// Session notifications, including the re-login signal
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn register(&self, request: &RegisterRequest) -> ChatResult<()> {
        self.api.register(request).await
    }

    /// Sign in and open a realtime session
    pub async fn login(&self, email: &str, password: &str) -> ChatResult<ChatSession> {
        let response = self
            .api
            .login(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;

        let session = Session::from_token(&response.access_token, Some(&response.user))?;
        self.session.establish(session)?;
        self.open_session()
    }

    /// Reopen a session from the store, if one was persisted
    pub async fn resume(&self) -> ChatResult<Option<ChatSession>> {
        match self.session.restore()? {
            Some(_) => self.open_session().map(Some),
            None => Ok(None),
        }
    }

    fn open_session(&self) -> ChatResult<ChatSession> {
        let user = self
            .session
            .current()
            .map(|s| s.profile())
            .ok_or(ChatError::AuthExpired)?;

        let realtime = Arc::new(RealtimeConnectionManager::new(
            self.config.transport.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.session),
        ));
        let engine = Arc::new(MessageSyncEngine::new(
            user.id.clone(),
            Arc::clone(&realtime) as Arc<dyn RoomChannel>,
            Arc::new(self.api.clone()),
        ));

        let _ = self.events.send(SessionEvent::LoggedIn {
            user_id: user.id.clone(),
        });

        let mut session = ChatSession {
            user,
            api: self.api.clone(),
            session: Arc::clone(&self.session),
            events: self.events.clone(),
            realtime,
            engine,
            tasks: Vec::new(),
        };
        session.start()?;
        Ok(session)
    }
}

/// Everything that lives for one login: the realtime channel, the sync
/// engine and the tasks that drive them. Dropping it stops the tasks.
pub struct ChatSession {
    user: UserProfile,
    api: ChatApi,
    session: Arc<SessionHandle>,
    events: broadcast::Sender<SessionEvent>,
    realtime: Arc<RealtimeConnectionManager>,
    engine: Arc<MessageSyncEngine>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatSession {
    fn start(&mut self) -> ChatResult<()> {
        let span = session_span(&self.user.id);
        let _entered = span.enter();

        let channel_events = self.realtime.subscribe();
        self.tasks.push(self.engine.spawn_event_loop(channel_events));
        self.tasks.push(self.spawn_session_watcher(span.clone()));

        info!("Starting realtime session");
        self.realtime.connect()
    }

    /// Follow token changes onto the channel and shut it on forced logout
    fn spawn_session_watcher(&self, span: tracing::Span) -> JoinHandle<()> {
        let mut events = self.events.subscribe();
        let realtime = Arc::clone(&self.realtime);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::TokenRefreshed) => {
                        realtime.get_channel();
                    }
                    Ok(SessionEvent::ReauthenticationRequired) | Ok(SessionEvent::LoggedOut) => {
                        realtime.disconnect();
                        break;
                    }
                    Ok(SessionEvent::LoggedIn { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Session watcher lagged, {} events lost", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        .instrument(span))
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    pub fn realtime(&self) -> &Arc<RealtimeConnectionManager> {
        &self.realtime
    }

    pub fn engine(&self) -> &Arc<MessageSyncEngine> {
        &self.engine
    }

    /// Everyone registered on the server
    pub async fn users(&self) -> ChatResult<Vec<UserProfile>> {
        self.api.list_users().await
    }

    /// Switch the conversation; the handle resolves once history is applied
    pub fn select_peer(&self, peer_id: &str) -> JoinHandle<()> {
        self.engine.set_active_conversation(peer_id)
    }

    pub fn send(&self, body: &str) -> ChatResult<String> {
        self.engine.send(body)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.engine.messages()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.engine.active_conversation()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.realtime.state()
    }

    /// Reconnect after a drop or a rejected handshake
    pub fn reconnect(&self) -> ChatResult<()> {
        self.realtime.connect()
    }

    /// Sign out. A failing server call does not keep the local session.
    pub async fn logout(self) -> ChatResult<()> {
        if let Err(e) = self.api.logout().await {
            warn!("Server logout failed, clearing local session anyway: {}", e);
        }
        self.realtime.disconnect();
        self.session.clear()?;
        let _ = self.events.send(SessionEvent::LoggedOut);
        info!("Logged out {}", self.user.id);
        Ok(())
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.realtime.disconnect();
    }
}
