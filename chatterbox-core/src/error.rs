// Error taxonomy for the client synchronization core

use serde::Deserialize;
use thiserror::Error;

/// Type alias for chat client results
pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The access token was rejected or is known to be expired.
    #[error("Access token expired")]
    AuthExpired,

    /// The refresh credential itself was rejected; the session is gone.
    #[error("Session refresh rejected: {message}")]
    AuthInvalid {
        message: String,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        retryable: bool,
    },

    /// The realtime handshake credential was refused by the server.
    #[error("Realtime handshake rejected: {message}")]
    ChannelAuthRejected {
        message: String,
    },

    #[error("Malformed token: {message}")]
    MalformedToken {
        message: String,
    },

    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        message: String,
    },

    #[error("Decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },
}

/// Error body shape returned by the chat API (`{"message": "..."}`)
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl ChatError {
    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
            retryable: true,
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
            retryable: true,
        }
    }

    /// Create a network error that keeps the underlying cause
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
            retryable: true,
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::AuthInvalid {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Map a non-success HTTP status and its body to an error.
    ///
    /// The server's `message` field is preserved when the body carries one.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<ApiErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

        match status {
            401 => ChatError::AuthExpired,
            400 => ChatError::BadRequest { message },
            _ => ChatError::Api { status, message },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::AuthExpired | ChatError::AuthInvalid { .. } | ChatError::MalformedToken { .. } => {
                ErrorCategory::Auth
            }
            ChatError::Network { .. } => ErrorCategory::Network,
            ChatError::ChannelAuthRejected { .. } => ErrorCategory::Channel,
            ChatError::Decode { .. } => ErrorCategory::Decode,
            ChatError::BadRequest { .. } => ErrorCategory::BadRequest,
            ChatError::Api { status, .. } => ErrorCategory::from_status(*status),
            ChatError::Storage { .. } => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::Network { retryable, .. } => *retryable,
            ChatError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// True when the error ends the user's session
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, ChatError::AuthInvalid { .. })
    }

    /// Text suitable for display next to a form.
    ///
    /// Uses the server-provided detail when there is one, otherwise `fallback`
    /// (e.g. "Login failed. Try again.").
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ChatError::Api { message, .. } | ChatError::BadRequest { message } if !message.is_empty() => {
                message.clone()
            }
            _ => fallback.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Auth,
    Channel,
    Decode,
    BadRequest,
    NotFound,
    Internal,
    Unknown,
}

impl ErrorCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorCategory::BadRequest,
            401 | 403 => ErrorCategory::Auth,
            404 => ErrorCategory::NotFound,
            500..=599 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }
}
