//! # Error Types Module
//!
//! Error types shared by the outbound integrations (CRM, catalog sources,
//! action log) and by the configuration layer.

use thiserror::Error;

/// Errors raised while talking to an upstream HTTP service
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Request could not be sent or the connection broke
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Upstream answered with a non-success status code
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Upstream answered 2xx but reported an application error
    #[error("upstream api error: {0}")]
    Api(String),
    /// Response body did not have the expected shape
    #[error("decode error: {0}")]
    Decode(String),
    /// Operation took longer than the configured timeout
    #[error("timeout error: {0}")]
    Timeout(String),
    /// Circuit breaker is open, request was not attempted
    #[error("circuit open for {0}")]
    CircuitOpen(String),
}

impl UpstreamError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Timeout(_) => true,
            UpstreamError::Api(_)
            | UpstreamError::Decode(_)
            | UpstreamError::CircuitOpen(_) => false,
        }
    }
}

/// Errors raised while reading settings from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display() {
        let e = UpstreamError::Status {
            status: 503,
            body: "unavailable".into(),
        };
        assert_eq!(e.to_string(), "upstream returned status 503: unavailable");
    }

    #[test]
    fn transient_classification() {
        let status = |status| UpstreamError::Status {
            status,
            body: String::new(),
        };
        assert!(status(502).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(UpstreamError::Timeout("lead".into()).is_transient());
        assert!(!UpstreamError::Api("ERROR_CORE".into()).is_transient());
        assert!(!UpstreamError::CircuitOpen("bitrix".into()).is_transient());
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::Invalid {
            key: "BOT_MODE",
            value: "push".into(),
        };
        assert!(e.to_string().contains("BOT_MODE"));
        assert!(e.to_string().contains("push"));
    }
}
