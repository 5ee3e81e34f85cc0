//! Error types for the upstream client.

/// Result type for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Errors returned while talking to the upstream sensor API.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The request could not be sent or the connection failed.
    #[error("Upstream request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("Upstream request to {0} timed out")]
    Timeout(String),

    /// Upstream answered with a non-success status.
    #[error("Upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not the expected JSON shape.
    #[error("Failed to decode upstream response: {0}")]
    Decode(String),

    /// The configured base URL is unusable.
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout(url.to_string())
        } else {
            Self::Request {
                url: url.to_string(),
                source,
            }
        }
    }
}
