use thiserror::Error;

/// Error taxonomy for the collaboration engine.
///
/// `is_retryable()` feeds the retry policy (C6); callers should not match on
/// variants directly to decide retry behavior.
#[derive(Debug, Error)]
pub enum CollabError {
    /// No requested agent had a usable client.
    #[error("no AI models available")]
    NoProviderAvailable,

    /// Authentication rejected by the provider.
    #[error("{provider} authentication failed: {message}")]
    ProviderAuthFailed { provider: String, message: String },

    /// Network timeout, 5xx, or rate-limit — retryable per policy.
    #[error("{provider} transient error: {message}")]
    ProviderTransient { provider: String, message: String },

    /// Response body did not parse as expected.
    #[error("response format error: {message} (raw: {raw_response})")]
    ResponseFormatError { message: String, raw_response: String },

    /// Session or daily cost cap exceeded.
    #[error("cost limit exceeded")]
    CostLimitExceeded,

    /// Session-wide deadline exceeded.
    #[error("global deadline exceeded")]
    GlobalDeadlineExceeded,

    /// Context persistence layer unavailable; session degrades but chat continues.
    #[error("context store unavailable: {message}")]
    ContextStoreUnavailable { message: String },

    /// Malformed inbound request; connection is preserved.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An invariant the engine relies on was violated; connection is closed.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    /// Generic transport-level failure.
    #[error("http error: {0}")]
    HttpError(String),

    #[error("json error: {0}")]
    JsonError(String),
}

impl CollabError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollabError::ProviderTransient { .. })
    }
}

impl From<reqwest::Error> for CollabError {
    fn from(error: reqwest::Error) -> Self {
        CollabError::HttpError(error.to_string())
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(error: serde_json::Error) -> Self {
        CollabError::JsonError(format!(
            "{error} (line {} column {})",
            error.line(),
            error.column()
        ))
    }
}

impl From<url::ParseError> for CollabError {
    fn from(error: url::ParseError) -> Self {
        CollabError::BadRequest(error.to_string())
    }
}
