// Transport configuration

use std::time::Duration;

/// Realtime transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server origin, `http(s)://` or `ws(s)://`
    pub url: String,
    /// Socket.IO endpoint path
    pub path: String,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            path: "/socket.io/".to_string(),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Create configuration builder
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// WebSocket URL for an Engine.IO v4 websocket-only session
    pub fn websocket_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}?EIO=4&transport=websocket", base, path)
    }
}

/// Transport configuration builder
#[derive(Default)]
pub struct TransportConfigBuilder {
    url: Option<String>,
    path: Option<String>,
    connection_timeout: Option<Duration>,
}

impl TransportConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Build configuration
    pub fn build(self) -> TransportConfig {
        let default = TransportConfig::default();

        TransportConfig {
            url: self.url.unwrap_or(default.url),
            path: self.path.unwrap_or(default.path),
            connection_timeout: self.connection_timeout.unwrap_or(default.connection_timeout),
        }
    }
}
