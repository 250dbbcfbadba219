//! Failure signals surfaced by the pipeline.
//!
//! Nothing here is returned to consumer code as an `Err`: transport errors go
//! to the connection error callback, synchronization failures are published
//! on their own broadcast sequence.

use std::fmt;
use std::time::Duration;

use sessync_core::{FetchError, RawEvent};
use thiserror::Error;

/// Notice shown to the user when the event connection is lost.
pub const CONNECTION_LOST_NOTICE: &str = "Connection lost, please reload the page";

/// A synchronizer could not obtain the authoritative value.
#[derive(Clone, Debug, Error)]
pub enum SyncError {
    /// The remote store answered with an error.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The remote store did not answer in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl SyncError {
    /// Whether fetching again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(err) => err.is_retryable(),
            Self::Timeout(_) => true,
        }
    }

    /// Short classification string for logs and output.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Fetch(err) => err.error_kind(),
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Which step of synchronization failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStage {
    /// Fetching the changed resource itself.
    Fetch,
    /// Fetching the derived type tags of a dataset.
    TypeTags,
}

/// "Resync needed" signal for one resource.
///
/// The local cache may now disagree with the remote store for
/// `event.resource_id`; no change record was published for the event.
#[derive(Clone, Debug)]
pub struct SyncFailure {
    /// The event whose synchronization failed.
    pub event: RawEvent,
    /// Where it failed.
    pub stage: SyncStage,
    /// Why it failed.
    pub error: SyncError,
}

impl SyncFailure {
    /// Id of the resource that needs a resync.
    pub fn resource_id(&self) -> &str {
        &self.event.resource_id
    }

    /// Whether a consumer should retry the resync or flag the resource.
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }

    /// Short classification of the underlying error.
    pub fn error_kind(&self) -> &'static str {
        self.error.error_kind()
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync of {} failed ({:?}): {}", self.event, self.stage, self.error)
    }
}

/// The event connection failed or was closed abnormally.
#[derive(Clone, Debug, Error)]
pub enum ConnectionError {
    /// The events URL could not be built.
    #[error("invalid events url: {0}")]
    InvalidUrl(String),
    /// The connection could not be opened.
    #[error("failed to open event connection: {0}")]
    Open(String),
    /// The server closed the connection for a reason other than idle timeout.
    #[error("event connection closed (code {code}: {reason})")]
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The stream ended without a close frame.
    #[error("event connection dropped without a close frame")]
    Dropped,
    /// Read or write failure on an open connection.
    #[error("event connection error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Text for the persistent, dismissible notice shown to the user.
    pub fn user_message(&self) -> &'static str {
        CONNECTION_LOST_NOTICE
    }
}
