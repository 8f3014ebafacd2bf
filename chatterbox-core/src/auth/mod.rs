// Authentication module: session state, token inspection and renewal

pub mod refresh;
pub mod session;
pub mod token;

pub use refresh::{TokenRefreshCoordinator, TokenRefresher};
pub use session::{
    FileSessionStore, MemorySessionStore, Session, SessionHandle, SessionStore, UserProfile,
};
pub use token::{decode_claims, TokenClaims};

/// Session-level notifications for the collaborator layers (navigation, realtime)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was established by login or restored from storage
    LoggedIn { user_id: String },
    /// The access token was replaced by a refresh
    TokenRefreshed,
    /// Refresh failed; the session was cleared and the user must log in again
    ReauthenticationRequired,
    /// The user logged out
    LoggedOut,
}
