//! Access token inspection
//!
//! Tokens are signed JWTs issued by the chat server. The client never verifies
//! the signature; it only reads the payload segment to learn the expiry and
//! the identity the token was issued for.

use crate::error::{ChatError, ChatResult};
use base64::Engine;
use serde::Deserialize;

/// Claims read from the payload segment of an access token
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry, seconds since the epoch
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued-at, seconds since the epoch
    #[serde(default)]
    pub iat: Option<i64>,
}

impl TokenClaims {
    /// User id the token was issued for, whichever claim carries it
    pub fn subject(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.user_id.as_deref())
            .or(self.sub.as_deref())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.full_name.as_deref().or(self.name.as_deref())
    }

    /// Expiry in milliseconds since the epoch
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.exp.map(|exp| exp.saturating_mul(1000))
    }

    /// A token without an `exp` claim never counts as expired
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        match self.expires_at_ms() {
            Some(expires) => expires <= now_ms,
            None => false,
        }
    }
}

/// Decode the payload of a `header.payload.signature` token.
///
/// Fails with [`ChatError::MalformedToken`] when the token does not have three
/// segments, the payload is not base64url, or the payload is not a JSON object.
pub fn decode_claims(token: &str) -> ChatResult<TokenClaims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => return Err(ChatError::malformed_token("expected three dot-separated segments")),
    };

    // Some issuers keep the padding; the URL-safe alphabet is mandatory.
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ChatError::malformed_token(format!("payload is not base64url: {}", e)))?;

    serde_json::from_slice::<TokenClaims>(&bytes)
        .map_err(|e| ChatError::malformed_token(format!("payload is not a claims object: {}", e)))
}

/// Whether `token` is known to be expired at `now_ms`.
///
/// An undecodable token has an unknown expiry and is reported as not expired;
/// the server decides in that case.
pub fn is_known_expired(token: &str, now_ms: i64) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.is_expired_at(now_ms),
        Err(ChatError::MalformedToken { message }) => {
            tracing::debug!("Token expiry unknown: {}", message);
            false
        }
        Err(_) => false,
    }
}

/// Current wall-clock time in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
