//! Backend error taxonomy: machine-readable code, human message, and a `retryable`
//! flag the retry policy and router fallback chain both act on.

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited")]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("backend error ({status}): {code}")]
    Backend {
        status: u16,
        code: String,
        retryable: bool,
    },

    #[error("invalid request: {0}")]
    Validation(String),
}

impl BackendError {
    /// Whether the retry policy should attempt this call again. Rate-limit and
    /// network errors and 5xx `Backend` errors are retryable; auth, bad-request, and
    /// 404 are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::RateLimit { .. } => true,
            BackendError::Network(_) => true,
            BackendError::Backend { retryable, .. } => *retryable,
            BackendError::Authentication(_) => false,
            BackendError::Validation(_) => false,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Authentication(_) => "authentication_error",
            BackendError::RateLimit { .. } => "rate_limit_error",
            BackendError::Network(_) => "network_error",
            BackendError::Backend { .. } => "backend_error",
            BackendError::Validation(_) => "validation_error",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            BackendError::Network(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Backend {
                status: status.as_u16(),
                code: status.to_string(),
                retryable: status.as_u16() == 429 || status.as_u16() >= 500,
            }
        } else {
            BackendError::Network(e.to_string())
        }
    }
}
