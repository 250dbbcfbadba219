//! Error types shared across the workspace.

use thiserror::Error;

/// A remote fetch failed.
///
/// Messages follow the HTTP error format shown to users: a request that
/// never got an answer renders as `Connection error <url>`, an HTTP error
/// as `<status> - <statusText> (<body>)`.
#[derive(Clone, Debug, Error)]
pub enum FetchError {
    /// DNS failure, refused connection, aborted request.
    #[error("Connection error {url}")]
    Connection {
        /// Requested URL.
        url: String,
    },
    /// The server answered with a non-success status.
    #[error("{status} - {status_text} ({body})")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase.
        status_text: String,
        /// Response body, possibly empty.
        body: String,
    },
    /// The response body did not match the expected record.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }

    /// Whether the resource is gone on the server.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Http { status: 401 | 403, .. } => "unauthorized",
            Self::Http { status: 404, .. } => "not_found",
            Self::Http { .. } => "http",
            Self::Decode(_) => "decode",
        }
    }
}

/// An inbound message could not be turned into a [`RawEvent`](crate::RawEvent).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not JSON, or missing required fields.
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),
    /// `resourceType` is not one we route.
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    /// `type` is not a known operation.
    #[error("unknown event type: {0}")]
    UnknownOperation(String),
}
