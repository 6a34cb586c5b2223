//! Error types for external capabilities.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when invoking an external capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The capability reported a rate limit - retry after the given duration.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The capability is not configured or not reachable.
    ///
    /// For the accuracy verifier this triggers the fail-open path; for a
    /// summarizer tier it degrades the unit to a sentinel output.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// The request timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The input was rejected by the capability - permanent, don't retry.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The capability returned a malformed or unusable response.
    #[error("{capability} error: {message}")]
    Upstream {
        capability: &'static str,
        message: String,
        retryable: bool,
    },

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing endpoint, bad API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl CapabilityError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn upstream(capability: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Upstream {
            capability,
            message: message.into(),
            retryable,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }

    /// Whether this error is a rate-limit signal.
    ///
    /// Only the final-compile invocation retries, and only on this class.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether retrying could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout(_) => true,
            Self::Upstream { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Unavailable(_) => false,
            Self::InvalidInput(_) => false,
            Self::Config(_) => false,
        }
    }

    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::InvalidInput(_) => "invalid_input",
            Self::Upstream { .. } => "upstream_error",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }
}
