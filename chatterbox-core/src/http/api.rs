// Typed calls for the chat REST API

use super::{ChatHttpClient, HttpExecutor, HttpMethod, PreparedRequest};
use crate::auth::{TokenRefresher, UserProfile};
use crate::error::{ChatError, ChatResult};
use crate::protocol::WireMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const REGISTER_PATH: &str = "/api/v1/user/register";
pub const LOGIN_PATH: &str = "/api/v1/user/login";
pub const LOGOUT_PATH: &str = "/api/v1/user/logout";
pub const USERS_PATH: &str = "/api/v1/user/list";
pub const REFRESH_PATH: &str = "/api/v1/user/refresh";

/// Path of the message history between two users
pub fn history_path(self_id: &str, peer_id: &str) -> String {
    format!(
        "/api/messages/{}/{}",
        urlencoding::encode(self_id),
        urlencoding::encode(peer_id)
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "token")]
    pub access_token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "token")]
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UserList {
    #[serde(default)]
    users: Vec<UserProfile>,
}

/// The REST endpoints of the chat server
#[derive(Clone)]
pub struct ChatApi {
    http: Arc<ChatHttpClient>,
}

impl ChatApi {
    pub fn new(http: Arc<ChatHttpClient>) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &Arc<ChatHttpClient> {
        &self.http
    }

    pub async fn register(&self, request: &RegisterRequest) -> ChatResult<()> {
        self.http
            .post(REGISTER_PATH)
            .unauthenticated()
            .json(request)?
            .send()
            .await?;
        info!("Registered {}", request.email);
        Ok(())
    }

    pub async fn login(&self, request: &LoginRequest) -> ChatResult<LoginResponse> {
        self.http
            .post(LOGIN_PATH)
            .unauthenticated()
            .json(request)?
            .send_json()
            .await
    }

    pub async fn logout(&self) -> ChatResult<()> {
        self.http.post(LOGOUT_PATH).send().await?;
        Ok(())
    }

    pub async fn list_users(&self) -> ChatResult<Vec<UserProfile>> {
        let list: UserList = self.http.get(USERS_PATH).send_json().await?;
        Ok(list.users)
    }

    pub async fn history(&self, self_id: &str, peer_id: &str) -> ChatResult<Vec<WireMessage>> {
        self.http.get(&history_path(self_id, peer_id)).send_json().await
    }
}

/// Calls the refresh endpoint with the ambient cookie credential only
pub struct HttpTokenRefresher {
    executor: Arc<dyn HttpExecutor>,
}

impl HttpTokenRefresher {
    pub fn new(executor: Arc<dyn HttpExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self) -> ChatResult<String> {
        let mut request = PreparedRequest::new(HttpMethod::Post, REFRESH_PATH);
        request.authenticated = false;

        let response = self.executor.execute(&request, None).await?;
        if !response.is_success() {
            let detail = ChatError::from_status(response.status(), response.body());
            warn!("Refresh endpoint answered {}", response.status());
            return Err(ChatError::auth_invalid(detail.to_string()));
        }

        let body: RefreshResponse = response.json()?;
        if body.access_token.is_empty() {
            return Err(ChatError::auth_invalid("refresh returned an empty token"));
        }
        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_path_encodes_segments() {
        assert_eq!(history_path("u1", "u2"), "/api/messages/u1/u2");
        assert_eq!(history_path("a b", "c/d"), "/api/messages/a%20b/c%2Fd");
    }

    #[test]
    fn test_login_response_shape() {
        let body = r#"{"accessToken":"t","user":{"id":"u1","fullName":"Ada","email":"a@x.io"}}"#;
        let response: LoginResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.access_token, "t");
        assert_eq!(response.user.id, "u1");
    }

    #[test]
    fn test_register_request_uses_camel_case() {
        let json = serde_json::to_value(RegisterRequest {
            full_name: "Ada".to_string(),
            email: "a@x.io".to_string(),
            password: "secret1".to_string(),
        })
        .unwrap();
        assert_eq!(json["fullName"], "Ada");
    }
}
