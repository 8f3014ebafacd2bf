//! Single-flight access token renewal
//!
//! Every protected call goes through [`TokenRefreshCoordinator::request`]. The
//! first call that comes back unauthorized starts a refresh; calls that fail
//! while it is running queue up behind it and replay with whatever token it
//! produces. Each call is replayed at most once.

use super::session::SessionHandle;
use super::SessionEvent;
use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Obtains a new access token using the long-lived refresh credential
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> ChatResult<String>;
}

type Waiter = oneshot::Sender<ChatResult<String>>;

/// Refresh state; `InFlight` holds the callers queued behind the running refresh
#[derive(Debug, Default)]
enum RefreshState {
    #[default]
    Idle,
    InFlight {
        waiters: VecDeque<Waiter>,
    },
}

/// What a caller should do after an unauthorized response
enum Admission {
    /// Another caller already refreshed; replay with this token
    Current(String),
    /// Wait for the running refresh
    Queued(oneshot::Receiver<ChatResult<String>>),
    /// This caller runs the refresh
    Leader,
}

pub struct TokenRefreshCoordinator {
    refresher: Arc<dyn TokenRefresher>,
    session: Arc<SessionHandle>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<RefreshState>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        session: Arc<SessionHandle>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            refresher,
            session,
            events,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Run `call` with the current token, renewing the token once if the call
    /// fails with [`ChatError::AuthExpired`].
    ///
    /// `call` receives the bearer token to attach (`None` when signed out). A
    /// replay that fails again is returned to the caller as is; it never
    /// starts another refresh.
    pub async fn request<F, Fut, T>(&self, mut call: F) -> ChatResult<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = ChatResult<T>>,
    {
        let sent_with = self.session.access_token();

        match call(sent_with.clone()).await {
            Err(ChatError::AuthExpired) => {}
            other => return other,
        }

        let token = self.renew(sent_with.as_deref()).await?;
        debug!("Replaying call with renewed token");
        call(Some(token)).await
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::InFlight { .. })
    }

    /// Number of callers queued behind the running refresh
    pub fn queued(&self) -> usize {
        match &*self.state.lock() {
            RefreshState::InFlight { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    async fn renew(&self, sent_with: Option<&str>) -> ChatResult<String> {
        match self.admit(sent_with) {
            Admission::Current(token) => {
                debug!("Token already renewed by another call");
                Ok(token)
            }
            Admission::Queued(rx) => rx
                .await
                .map_err(|_| ChatError::network("Token refresh abandoned"))?,
            Admission::Leader => self.lead_refresh().await,
        }
    }

    fn admit(&self, sent_with: Option<&str>) -> Admission {
        let mut state = self.state.lock();
        match &mut *state {
            RefreshState::InFlight { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push_back(tx);
                debug!("Queued behind running refresh ({} waiting)", waiters.len());
                Admission::Queued(rx)
            }
            RefreshState::Idle => {
                // The call went out with a token that has since been replaced.
                if let Some(current) = self.session.access_token() {
                    if sent_with != Some(current.as_str()) {
                        return Admission::Current(current);
                    }
                }
                *state = RefreshState::InFlight {
                    waiters: VecDeque::new(),
                };
                Admission::Leader
            }
        }
    }

    async fn lead_refresh(&self) -> ChatResult<String> {
        info!("Access token rejected, refreshing");
        let mut guard = InFlightGuard { coordinator: self, armed: true };

        let outcome = self.refresher.refresh().await;

        guard.armed = false;
        let waiters = self.take_waiters();

        match outcome {
            Ok(token) => {
                match self.session.replace_token(&token) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Session ended during refresh, failing {} queued calls", waiters.len());
                        for waiter in waiters {
                            let _ = waiter.send(Err(ChatError::auth_invalid("session ended")));
                        }
                        return Err(ChatError::auth_invalid("session ended"));
                    }
                    Err(e) => warn!("Failed to persist refreshed token: {}", e),
                }
                let _ = self.events.send(SessionEvent::TokenRefreshed);
                info!("Token refreshed, releasing {} queued calls", waiters.len());

                for waiter in waiters {
                    let _ = waiter.send(Ok(token.clone()));
                }
                Ok(token)
            }
            Err(err) => {
                let message = err.to_string();
                warn!("Token refresh failed, ending session: {}", message);

                for waiter in waiters {
                    let _ = waiter.send(Err(ChatError::auth_invalid(message.clone())));
                }
                if let Err(e) = self.session.clear() {
                    warn!("Failed to clear session: {}", e);
                }
                let _ = self.events.send(SessionEvent::ReauthenticationRequired);
                Err(ChatError::auth_invalid(message))
            }
        }
    }

    fn take_waiters(&self) -> VecDeque<Waiter> {
        match std::mem::take(&mut *self.state.lock()) {
            RefreshState::InFlight { waiters } => waiters,
            RefreshState::Idle => VecDeque::new(),
        }
    }
}

/// Resets the in-flight state if the leading caller is dropped mid-refresh.
/// Queued callers then see their sender dropped.
struct InFlightGuard<'a> {
    coordinator: &'a TokenRefreshCoordinator,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Refresh cancelled before completion");
            drop(self.coordinator.take_waiters());
        }
    }
}
