// Client configuration

use crate::http::HttpConfig;
use crate::transport::TransportConfig;
use std::time::Duration;

pub const API_URL_VAR: &str = "CHATTERBOX_API_URL";
pub const SOCKET_URL_VAR: &str = "CHATTERBOX_SOCKET_URL";

/// Configuration for a [`ChatClient`](super::ChatClient)
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub http: HttpConfig,
    pub transport: TransportConfig,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Read server URLs from `CHATTERBOX_API_URL` and `CHATTERBOX_SOCKET_URL`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut builder = Self::builder();
        if let Some(url) = lookup(API_URL_VAR).filter(|v| !v.trim().is_empty()) {
            builder = builder.api_url(url);
        }
        if let Some(url) = lookup(SOCKET_URL_VAR).filter(|v| !v.trim().is_empty()) {
            builder = builder.socket_url(url);
        }
        builder.build()
    }
}

/// Client configuration builder
#[derive(Default)]
pub struct ClientConfigBuilder {
    api_url: Option<String>,
    socket_url: Option<String>,
    request_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    /// Timeout of a single REST call
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Timeout for opening the realtime transport
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ClientConfig {
        let mut http = HttpConfig::builder();
        if let Some(url) = self.api_url {
            http = http.api_url(url);
        }
        if let Some(timeout) = self.request_timeout {
            http = http.request_timeout(timeout);
        }

        let mut transport = TransportConfig::builder();
        if let Some(url) = self.socket_url {
            transport = transport.url(url);
        }
        if let Some(timeout) = self.connection_timeout {
            transport = transport.connection_timeout(timeout);
        }

        ClientConfig {
            http: http.build(),
            transport: transport.build(),
        }
    }
}
