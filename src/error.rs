use thiserror::Error;

/// Unified error type for submission and both retrieval strategies.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP/network error while building, sending or reading a request.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status with the server-provided message.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body was not valid for the expected type.
    #[error("decode: {0}")]
    Decode(String),

    /// The prediction itself reported a failure (error field or error event).
    #[error("{0}")]
    Remote(String),

    /// Output was well-formed but could not be turned into a result string.
    #[error("extract: {0}")]
    Extraction(String),

    /// An event block grew past the configured limit without a boundary.
    #[error("event frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    /// Polling stopped before the completion predicate held.
    #[error("prediction unfinished after {0} polls")]
    PollLimit(u32),

    /// No API key configured.
    #[error("missing API key")]
    MissingApiKey,

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if a caller-side retry could plausibly succeed.
    ///
    /// Nothing in this crate retries on its own.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Api { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    /// Create an API error from status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a remote error.
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create an extraction error.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_displays_message_verbatim() {
        assert_eq!(Error::remote("boom").to_string(), "boom");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(Error::api(429, "slow down").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(!Error::api(422, "invalid input").is_retryable());
        assert!(!Error::remote("boom").is_retryable());
        assert!(!Error::decode("eof").is_retryable());
    }
}
