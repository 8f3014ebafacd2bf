// HTTP client for the chat REST API
//
// Every call goes through `ChatHttpClient::execute`, which attaches the bearer
// token and hands authorization failures to the refresh coordinator.

use crate::auth::token::{is_known_expired, now_ms};
use crate::auth::{SessionHandle, TokenRefreshCoordinator};
use crate::error::{ChatError, ChatResult};
use crate::logging::generate_correlation_id;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub use self::api::{ChatApi, HttpTokenRefresher, LoginRequest, LoginResponse, RegisterRequest};
pub use self::config::HttpConfig;

pub mod api;
mod config;

/// HTTP methods used by the chat API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully built call that can be sent, and replayed, any number of times
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Whether the call carries the bearer token (and may trigger a refresh)
    pub authenticated: bool,
}

impl PreparedRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            authenticated: true,
        }
    }
}

/// Buffered HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Get response status code
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parse response as JSON
    pub fn json<T: DeserializeOwned>(&self) -> ChatResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| ChatError::Decode {
            message: format!("Failed to parse response: {}", e),
            source: Some(Box::new(e)),
        })
    }

    /// Get response as text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one prepared request over the wire
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    /// `bearer` is attached as `Authorization: Bearer <token>` when present
    async fn execute(&self, request: &PreparedRequest, bearer: Option<&str>) -> ChatResult<HttpResponse>;
}

/// `reqwest`-backed executor.
///
/// The cookie store keeps the server's refresh cookie, which the refresh
/// call relies on instead of the bearer token.
pub struct ReqwestExecutor {
    client: Client,
    config: HttpConfig,
}

impl ReqwestExecutor {
    pub fn new(config: HttpConfig) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(HttpConfig::user_agent())
            .cookie_store(true)
            .build()
            .map_err(|e| ChatError::network_with_source("Failed to build HTTP client", e))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &PreparedRequest, bearer: Option<&str>) -> ChatResult<HttpResponse> {
        let url = self.config.endpoint(&request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };

        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ChatError::timeout(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                ChatError::network_with_source(format!("Connection failed: {}", url), e)
            } else {
                ChatError::network_with_source(format!("Request to {} failed", url), e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ChatError::network_with_source("Failed to read response", e))?;

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Request client: the single entry point for REST calls
pub struct ChatHttpClient {
    executor: Arc<dyn HttpExecutor>,
    session: Arc<SessionHandle>,
    refresh: Arc<TokenRefreshCoordinator>,
    default_headers: Vec<(String, String)>,
}

impl ChatHttpClient {
    pub fn new(
        executor: Arc<dyn HttpExecutor>,
        session: Arc<SessionHandle>,
        refresh: Arc<TokenRefreshCoordinator>,
    ) -> Self {
        Self {
            executor,
            session,
            refresh,
            default_headers: vec![("Accept".to_string(), "application/json".to_string())],
        }
    }

    pub fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    /// Create a GET request builder
    pub fn get(&self, path: &str) -> HttpRequestBuilder<'_> {
        HttpRequestBuilder::new(self, HttpMethod::Get, path)
    }

    /// Create a POST request builder
    pub fn post(&self, path: &str) -> HttpRequestBuilder<'_> {
        HttpRequestBuilder::new(self, HttpMethod::Post, path)
    }

    /// Send a prepared request.
    ///
    /// Authenticated calls go through the refresh coordinator: an
    /// unauthorized answer (or a token already known to be expired) triggers
    /// one shared refresh and a single replay.
    pub async fn execute(&self, request: PreparedRequest) -> ChatResult<HttpResponse> {
        let correlation_id = generate_correlation_id();
        debug!(
            correlation_id = %correlation_id,
            "{:?} {}",
            request.method,
            request.path
        );

        if !request.authenticated {
            return self.attempt(&request, None).await;
        }

        let request = &request;
        self.refresh
            .request(move |token| self.attempt(request, token))
            .await
    }

    async fn attempt(&self, request: &PreparedRequest, token: Option<String>) -> ChatResult<HttpResponse> {
        if let Some(token) = token.as_deref() {
            if is_known_expired(token, now_ms()) {
                debug!("Token expired locally, skipping network call");
                return Err(ChatError::AuthExpired);
            }
        }

        let response = self.executor.execute(request, token.as_deref()).await?;

        if response.is_success() {
            return Ok(response);
        }
        if response.status() == 401 && request.authenticated {
            return Err(ChatError::AuthExpired);
        }

        let error = ChatError::from_status(response.status(), response.body());
        warn!("{} failed with status {}: {}", request.path, response.status(), error);
        Err(error)
    }
}

/// HTTP request builder for fluent API
pub struct HttpRequestBuilder<'a> {
    client: &'a ChatHttpClient,
    request: PreparedRequest,
}

impl<'a> HttpRequestBuilder<'a> {
    fn new(client: &'a ChatHttpClient, method: HttpMethod, path: &str) -> Self {
        let mut request = PreparedRequest::new(method, path);
        request.headers = client.default_headers.clone();
        Self { client, request }
    }

    /// Send without the bearer token (login, register, refresh)
    pub fn unauthenticated(mut self) -> Self {
        self.request.authenticated = false;
        self
    }

    /// Set JSON body
    pub fn json<T: Serialize>(mut self, body: &T) -> ChatResult<Self> {
        let json = serde_json::to_vec(body)
            .map_err(|e| ChatError::decode(format!("Failed to serialize request: {}", e)))?;
        self.request.body = Some(json);
        self.request
            .headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        Ok(self)
    }

    pub fn build(self) -> PreparedRequest {
        self.request
    }

    /// Send the request and get the raw response
    pub async fn send(self) -> ChatResult<HttpResponse> {
        self.client.execute(self.request).await
    }

    /// Send the request and parse response as JSON
    pub async fn send_json<T: DeserializeOwned>(self) -> ChatResult<T> {
        self.send().await?.json()
    }
}
