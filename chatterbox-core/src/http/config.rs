// REST endpoint settings

use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Where the chat REST API lives and how long calls may take
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Origin the `/api/...` routes are resolved against
    pub api_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpConfig {
    pub fn builder() -> HttpConfigBuilder {
        HttpConfigBuilder::default()
    }

    /// Absolute URL of an API route
    pub fn endpoint(&self, path: &str) -> String {
        let origin = self.api_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", origin, path)
        } else {
            format!("{}/{}", origin, path)
        }
    }

    pub(crate) fn user_agent() -> String {
        format!("chatterbox-core/{}", crate::version())
    }
}

#[derive(Debug, Default)]
pub struct HttpConfigBuilder {
    config: HttpConfig,
}

impl HttpConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn build(self) -> HttpConfig {
        self.config
    }
}
