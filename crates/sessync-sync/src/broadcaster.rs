//! Hot, multicast delivery of change records.
//!
//! One broadcast sender per resource type, plus one for synchronization
//! failures. Workers publish whether or not anyone listens, so every event
//! is computed exactly once and a late subscriber sees only what is
//! published after it subscribed.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use sessync_core::{ChangeRecord, Dataset, Job, Session};

use crate::error::SyncFailure;

/// Default buffer per sequence before slow subscribers start lagging.
pub const DEFAULT_CAPACITY: usize = 256;

/// The five published sequences.
pub struct ChangeBroadcaster {
    datasets: broadcast::Sender<ChangeRecord<Dataset>>,
    jobs: broadcast::Sender<ChangeRecord<Job>>,
    sessions: broadcast::Sender<ChangeRecord<Session>>,
    authorization: broadcast::Sender<ChangeRecord<Session>>,
    failures: broadcast::Sender<SyncFailure>,
}

impl ChangeBroadcaster {
    /// Create the sequences, each buffering `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            datasets: broadcast::channel(capacity).0,
            jobs: broadcast::channel(capacity).0,
            sessions: broadcast::channel(capacity).0,
            authorization: broadcast::channel(capacity).0,
            failures: broadcast::channel(capacity).0,
        }
    }

    /// Dataset change records.
    pub fn subscribe_datasets(&self) -> broadcast::Receiver<ChangeRecord<Dataset>> {
        self.datasets.subscribe()
    }

    /// Job change records.
    pub fn subscribe_jobs(&self) -> broadcast::Receiver<ChangeRecord<Job>> {
        self.jobs.subscribe()
    }

    /// Session metadata change records.
    pub fn subscribe_sessions(&self) -> broadcast::Receiver<ChangeRecord<Session>> {
        self.sessions.subscribe()
    }

    /// Authorization revocations.
    pub fn subscribe_authorization(&self) -> broadcast::Receiver<ChangeRecord<Session>> {
        self.authorization.subscribe()
    }

    /// Resync-needed signals.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    pub(crate) fn publish_dataset(&self, record: ChangeRecord<Dataset>) {
        publish(&self.datasets, "dataset", record);
    }

    pub(crate) fn publish_job(&self, record: ChangeRecord<Job>) {
        publish(&self.jobs, "job", record);
    }

    pub(crate) fn publish_session(&self, record: ChangeRecord<Session>) {
        publish(&self.sessions, "session", record);
    }

    pub(crate) fn publish_authorization(&self, record: ChangeRecord<Session>) {
        publish(&self.authorization, "authorization", record);
    }

    pub(crate) fn publish_failure(&self, failure: SyncFailure) {
        warn!(
            %failure,
            kind = failure.error_kind(),
            retryable = failure.is_retryable(),
            "resync needed"
        );
        publish(&self.failures, "failure", failure);
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn publish<T>(tx: &broadcast::Sender<T>, sequence: &'static str, item: T) {
    // An error only means nobody is subscribed right now.
    let receivers = tx.send(item).unwrap_or(0);
    debug!(sequence, receivers, "published");
}

/// Adapt a receiver into a `Stream`, skipping over records lost to lag.
pub fn into_stream<T>(rx: broadcast::Receiver<T>) -> impl Stream<Item = T> + Unpin
where
    T: Clone + Send + 'static,
{
    BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(item) => Some(item),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "subscriber lagged, records skipped");
            None
        }
    })
}
