use thiserror::Error;

use crate::http::HttpError;

/// Errors that can occur when talking to a feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport failure: connection refused, timeout, reset.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// The server answered with a status the operation does not accept.
    #[error("unexpected status {status} from {url}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// A listing or metadata body could not be decoded.
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Scratch file handling failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The endpoint base URL cannot be used.
    #[error("invalid feed URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Feed type string not recognised.
    #[error("unknown feed type: {0}")]
    UnknownFeedType(String),

    /// The ambient cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Every attempt failed with a retryable error.
    #[error("{operation} {target} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        target: String,
        attempts: u32,
        #[source]
        last: Box<FeedError>,
    },
}

impl FeedError {
    /// Create a status error.
    #[inline]
    pub fn status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    /// Create a decode error.
    #[inline]
    pub fn decode(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an I/O error for a path.
    #[inline]
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// HTTP status carried by this error, looking through retry exhaustion.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    /// Transient failures worth another attempt.
    ///
    /// Decode errors count as transient: another backend instance may answer
    /// correctly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Status { .. } | Self::Decode { .. } | Self::Io { .. }
        )
    }

    /// Rate limited (429) or forbidden (403): stop instead of retrying.
    pub fn is_policy_terminal(&self) -> bool {
        matches!(self.status_code(), Some(429) | Some(403))
    }

    /// Whether this error only reflects cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
