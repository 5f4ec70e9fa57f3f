use thiserror::Error;

/// A listing or content request against the Drive API failed.
#[derive(Debug, Error)]
pub enum RemoteAccessError {
    #[error("Drive API returned HTTP {status} for {context}: {message}")]
    Status {
        status: u16,
        context: String,
        message: String,
    },

    #[error("Request failed for {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response for {context}: {message}")]
    Malformed { context: String, message: String },
}

impl RemoteAccessError {
    /// The credential was rejected; retrying with the same token is pointless.
    /// Drive answers most of these with 401, some with a 403 carrying an
    /// `authError` reason.
    pub fn is_auth(&self) -> bool {
        match self {
            RemoteAccessError::Status { status: 401, .. } => true,
            RemoteAccessError::Status {
                status: 403,
                message,
                ..
            } => message.contains("authError") || message.contains("UNAUTHENTICATED"),
            _ => false,
        }
    }

    /// Transient failures worth another attempt: rate limiting, server
    /// errors and dropped connections.
    ///
    /// Drive reports per-user rate limiting as 403 with a `rateLimitExceeded`
    /// reason, so that case is retryable too.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteAccessError::Status {
                status: 403,
                message,
                ..
            } => {
                let message = message.to_ascii_lowercase();
                message.contains("ratelimitexceeded") || message.contains("rate limit exceeded")
            }
            RemoteAccessError::Status { status, .. } => *status == 429 || *status >= 500,
            RemoteAccessError::Transport { .. } => true,
            RemoteAccessError::Malformed { .. } => false,
        }
    }
}
