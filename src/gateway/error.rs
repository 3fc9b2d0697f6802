//! Error types for the provider gateway.

use std::time::Duration;
use thiserror::Error;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error status (e.g. "RESOURCE_EXHAUSTED").
    pub provider_code: Option<String>,
    /// Request ID from provider headers, when present.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling the provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limited - caller should retry after the specified duration.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    /// Invalid request - permanent error, don't retry.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Authentication or permission failure - permanent, check credentials.
    #[error("permission denied: {message}")]
    PermissionDenied {
        message: String,
        context: Option<ErrorContext>,
    },

    /// The model declined to generate (safety filtering) - permanent.
    ///
    /// Kept distinct from [`ProviderError::EmptyCandidates`] because the
    /// remediation shown to the user differs: rephrase vs. retry.
    #[error("generation blocked: {reason}")]
    Blocked { reason: String },

    /// The provider returned a well-formed response with no candidates.
    #[error("no candidates in response")]
    EmptyCandidates,

    /// Provider-side error - may be retryable (5xx, transient internal errors).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// Request timed out - retryable.
    #[error("timeout after {0:?}")]
    Timeout(Duration, Option<ErrorContext>),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Create a rate limited error.
    pub fn rate_limited(retry_after: Duration, context: ErrorContext) -> Self {
        Self::RateLimited {
            retry_after,
            context: Some(context),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    /// Create a permission denied error.
    pub fn permission_denied(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::PermissionDenied {
            message: message.into(),
            context: Some(context),
        }
    }

    /// Create a blocked-generation error.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            message: message.into(),
            retryable,
            context: None,
        }
    }

    /// Create a provider error with context.
    pub fn provider_with_context(
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout(_, _) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest { .. } => false,
            Self::PermissionDenied { .. } => false,
            Self::Blocked { .. } => false,
            Self::EmptyCandidates => false,
            Self::Config(_) => false,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Blocked { .. } => "blocked",
            Self::EmptyCandidates => "empty_candidates",
            Self::Provider { .. } => "provider_error",
            Self::Timeout(_, _) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => context.as_ref(),
            Self::InvalidRequest { context, .. } => context.as_ref(),
            Self::PermissionDenied { context, .. } => context.as_ref(),
            Self::Provider { context, .. } => context.as_ref(),
            Self::Timeout(_, context) => context.as_ref(),
            _ => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }

    /// A message suitable for showing to the end user.
    ///
    /// Keeps the blocked/empty/transient distinction the UI depends on.
    pub fn user_message(&self) -> String {
        match self {
            Self::Blocked { reason } => format!(
                "The model declined to analyze this content ({reason}). \
                 Try rephrasing or submitting a different excerpt."
            ),
            Self::EmptyCandidates => {
                "The model returned an empty response. Try running the analysis again.".into()
            }
            Self::PermissionDenied { .. } | Self::Config(_) => {
                "Provider authentication failed. Check your API key and try again.".into()
            }
            Self::RateLimited { .. } | Self::Timeout(_, _) => {
                "The provider is temporarily unavailable. Try again in a moment.".into()
            }
            other => format!("Analysis failed: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let rl = ProviderError::rate_limited(Duration::from_secs(30), ErrorContext::new());
        assert!(rl.is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(120), None).is_retryable());
        assert!(ProviderError::provider("internal", true).is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!ProviderError::invalid_request("bad schema").is_retryable());
        assert!(!ProviderError::blocked("SAFETY").is_retryable());
        assert!(!ProviderError::EmptyCandidates.is_retryable());
        assert!(!ProviderError::config("no key").is_retryable());
        assert!(
            !ProviderError::permission_denied("expired key", ErrorContext::new()).is_retryable()
        );
    }

    #[test]
    fn user_message_distinguishes_blocked_from_empty() {
        let blocked = ProviderError::blocked("SAFETY").user_message();
        let empty = ProviderError::EmptyCandidates.user_message();
        assert!(blocked.contains("declined"));
        assert!(empty.contains("empty"));
        assert_ne!(blocked, empty);
    }
}
