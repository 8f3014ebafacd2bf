// Logging and tracing setup

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Extra `EnvFilter` directives, e.g. `"chatterbox_core::sync=trace"`
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            directives: None,
        }
    }
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    fn filter(&self) -> EnvFilter {
        let mut combined = self.level.as_str().to_string();
        if let Some(directives) = &self.directives {
            combined.push(',');
            combined.push_str(directives);
        }
        EnvFilter::try_new(&combined).unwrap_or_else(|_| EnvFilter::new(self.level.as_str()))
    }
}

#[derive(Default)]
pub struct LogConfigBuilder {
    level: Option<LogLevel>,
    format: Option<LogFormat>,
    directives: Option<String>,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    pub fn build(self) -> LogConfig {
        let default = LogConfig::default();
        LogConfig {
            level: self.level.unwrap_or(default.level),
            format: self.format.unwrap_or(default.format),
            directives: self.directives.or(default.directives),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed (tests, embedding
/// applications), in which case the existing one is left alone.
pub fn init_logging(config: LogConfig) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(config.filter());

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    };

    if installed {
        info!("Logging initialized with level: {:?}", config.level);
    }
    installed
}

/// Span that ties every log line of one signed-in session together
pub fn session_span(user_id: &str) -> Span {
    tracing::info_span!("session", user_id = %user_id, trace_id = %generate_trace_id())
}

pub fn generate_correlation_id() -> String {
    format!("corr_{}", CORRELATION_COUNTER.fetch_add(1, Ordering::SeqCst))
}

pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Shorten a credential for log output
pub fn redact_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    if token.chars().count() <= 6 {
        "[REDACTED]".to_string()
    } else {
        format!("{}…[REDACTED]", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_token_hides_most_of_the_value() {
        let redacted = redact_token("eyJhbGciOiJIUzI1NiJ9.payload.sig");
        assert!(redacted.starts_with("eyJhbG"));
        assert!(!redacted.contains("payload"));
        assert_eq!(redact_token("short"), "[REDACTED]");
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = generate_correlation_id();
        let b = generate_correlation_id();
        assert_ne!(a, b);
        assert!(a.starts_with("corr_"));
    }

    #[test]
    fn test_builder_defaults() {
        let config = LogConfig::builder().level(LogLevel::Debug).build();
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.directives.is_none());
    }

    #[test]
    fn test_init_twice_keeps_first_subscriber() {
        let _ = init_logging(LogConfig::default());
        assert!(!init_logging(LogConfig::builder().format(LogFormat::Json).build()));
    }
}
