// Session state and its persisted form

use super::token::decode_claims;
use crate::error::{ChatError, ChatResult};
use crate::logging::redact_token;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage key for the access token
pub const TOKEN_KEY: &str = "token";
/// Storage key for the signed-in user's profile
pub const USER_KEY: &str = "user";

/// Minimal user profile as returned by login and the roster call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
}

/// The authenticated session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    /// `None` when the token payload could not be decoded
    pub expires_at_ms: Option<i64>,
    pub user_id: String,
    pub display_name: String,
}

impl Session {
    /// Build a session from a freshly issued token.
    ///
    /// The profile returned alongside the token wins over the token claims. A
    /// token whose payload cannot be decoded still yields a session (with an
    /// unknown expiry) as long as a profile supplies the identity.
    pub fn from_token(access_token: impl Into<String>, profile: Option<&UserProfile>) -> ChatResult<Self> {
        let access_token = access_token.into();

        let claims = match decode_claims(&access_token) {
            Ok(claims) => Some(claims),
            Err(ChatError::MalformedToken { message }) => {
                debug!("Access token payload unreadable, expiry unknown: {}", message);
                None
            }
            Err(e) => return Err(e),
        };

        let user_id = profile
            .map(|p| p.id.clone())
            .or_else(|| claims.as_ref().and_then(|c| c.subject().map(str::to_string)))
            .ok_or_else(|| ChatError::malformed_token("token carries no user identity"))?;

        let display_name = profile
            .map(|p| p.full_name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| claims.as_ref().and_then(|c| c.display_name().map(str::to_string)))
            .unwrap_or_default();

        Ok(Self {
            expires_at_ms: claims.as_ref().and_then(|c| c.expires_at_ms()),
            access_token,
            user_id,
            display_name,
        })
    }

    /// Known-expired check; an unknown expiry is never expired
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        matches!(self.expires_at_ms, Some(expires) if expires <= now_ms)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.user_id.clone(),
            full_name: self.display_name.clone(),
            email: String::new(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &redact_token(&self.access_token))
            .field("expires_at_ms", &self.expires_at_ms)
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Persistent key/value storage for the session
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> ChatResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ChatResult<()>;
    fn remove(&self, key: &str) -> ChatResult<()>;
}

/// In-memory store, lost when the process exits
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> ChatResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> ChatResult<HashMap<String, String>> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ChatError::storage(format!("Corrupt session file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(ChatError::storage(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save(&self, entries: &HashMap<String, String>) -> ChatResult<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| ChatError::storage(format!("Failed to serialize session: {}", e)))?;
        std::fs::write(&self.path, json).map_err(|e| {
            ChatError::storage(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> ChatResult<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ChatResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> ChatResult<()> {
        let _guard = self.lock.lock();
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

/// Owner of the live session value and its persisted copy.
///
/// Every protected call reads the bearer token from here, so replacing the
/// token also replaces the credential used by all subsequent calls.
pub struct SessionHandle {
    store: Arc<dyn SessionStore>,
    current: RwLock<Option<Session>>,
}

impl SessionHandle {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Load a previously persisted session, if any
    pub fn restore(&self) -> ChatResult<Option<Session>> {
        let token = match self.store.get(TOKEN_KEY)? {
            Some(token) if !token.is_empty() => token,
            _ => return Ok(None),
        };

        let profile = match self.store.get(USER_KEY)? {
            Some(json) => match serde_json::from_str::<UserProfile>(&json) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("Ignoring unreadable stored profile: {}", e);
                    None
                }
            },
            None => None,
        };

        let session = match Session::from_token(token, profile.as_ref()) {
            Ok(session) => session,
            Err(e) => {
                warn!("Stored session unusable, clearing: {}", e);
                self.clear()?;
                return Ok(None);
            }
        };

        info!("Restored session for user {}", session.user_id);
        *self.current.write() = Some(session.clone());
        Ok(Some(session))
    }

    /// Install and persist a new session
    pub fn establish(&self, session: Session) -> ChatResult<()> {
        let profile = serde_json::to_string(&session.profile())
            .map_err(|e| ChatError::storage(format!("Failed to serialize profile: {}", e)))?;
        self.store.set(TOKEN_KEY, &session.access_token)?;
        self.store.set(USER_KEY, &profile)?;

        info!("Session established for user {}", session.user_id);
        *self.current.write() = Some(session);
        Ok(())
    }

    /// Swap in a refreshed access token, keeping the identity.
    ///
    /// Returns `false` and drops the token when the session has already been
    /// cleared, so a refresh finishing after logout cannot revive it.
    pub fn replace_token(&self, access_token: &str) -> ChatResult<bool> {
        let mut current = self.current.write();
        let profile = match current.as_ref() {
            Some(session) => session.profile(),
            None => {
                debug!("No session, discarding refreshed token");
                return Ok(false);
            }
        };

        let session = Session::from_token(access_token, Some(&profile))?;
        self.store.set(TOKEN_KEY, access_token)?;
        debug!("Access token replaced ({})", redact_token(access_token));
        *current = Some(session);
        Ok(true)
    }

    /// Drop the session and its persisted copy
    pub fn clear(&self) -> ChatResult<()> {
        *self.current.write() = None;
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USER_KEY)?;
        Ok(())
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.access_token.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.user_id.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("current", &*self.current.read())
            .finish()
    }
}
