//! Public facade: one service per open session.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sessync_core::{ChangeRecord, Dataset, Job, RawEvent, Session, SessionId, SessionResource};

use crate::broadcaster::{ChangeBroadcaster, DEFAULT_CAPACITY, into_stream};
use crate::connection::{ConnectionConfig, ConnectionHandle, ConnectionState, ErrorCallback};
use crate::error::{ConnectionError, SyncFailure};
use crate::ingest::{LocalEventInjector, ingestion_channel};
use crate::pipeline::{self, Stages};
use crate::session_data::SessionData;
use crate::synchronizer::Synchronizer;
use crate::type_tags::TypeTagUpdater;

/// Upper bound on a single remote fetch unless the builder overrides it.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`SessionEventService`].
pub struct SessionEventServiceBuilder {
    data: Arc<SessionData>,
    resource: Arc<dyn SessionResource>,
    fetch_timeout: Option<Duration>,
    broadcast_capacity: usize,
    connection: Option<(ConnectionConfig, SecretString)>,
    on_error: Option<ErrorCallback>,
}

impl SessionEventServiceBuilder {
    /// Bound every remote fetch. Defaults to [`DEFAULT_FETCH_TIMEOUT`];
    /// `None` waits forever.
    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Records buffered per sequence before slow subscribers lag.
    #[must_use]
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Open an event connection. Without this the service only processes
    /// injected events.
    #[must_use]
    pub fn connect(mut self, config: ConnectionConfig, token: SecretString) -> Self {
        self.connection = Some((config, token));
        self
    }

    /// Called once per connection failure.
    #[must_use]
    pub fn on_connection_error(
        mut self,
        callback: impl Fn(&ConnectionError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Start the pipeline, and the connection if configured. Must be called
    /// inside a Tokio runtime.
    pub fn start(self) -> Result<SessionEventService, ConnectionError> {
        let session_id = self.data.session_id();
        let cancel = CancellationToken::new();
        let (sink, ingest) = ingestion_channel(cancel.clone());
        let broadcaster = Arc::new(ChangeBroadcaster::new(self.broadcast_capacity));

        let connection = match self.connection {
            Some((config, token)) => {
                let on_error: ErrorCallback = match self.on_error {
                    Some(callback) => callback,
                    None => Arc::new(|_: &ConnectionError| {}),
                };
                Some(ConnectionHandle::open(
                    config,
                    &session_id,
                    &token,
                    sink.clone(),
                    on_error,
                    cancel.child_token(),
                )?)
            }
            None => None,
        };

        let stages = Stages {
            synchronizer: Synchronizer::new(
                Arc::clone(&self.data),
                Arc::clone(&self.resource),
                self.fetch_timeout,
            ),
            type_tags: TypeTagUpdater::new(
                Arc::clone(&self.data),
                self.resource,
                self.fetch_timeout,
            ),
            broadcaster: Arc::clone(&broadcaster),
            cancel: cancel.clone(),
        };
        let tasks = pipeline::spawn(ingest, stages);
        info!(%session_id, connected = connection.is_some(), "session event service started");

        Ok(SessionEventService {
            session_id,
            data: self.data,
            injector: LocalEventInjector::new(sink),
            broadcaster,
            connection,
            cancel,
            tasks,
        })
    }
}

/// Keeps one session's cache in sync and publishes what changed.
///
/// Dropping the service closes it.
pub struct SessionEventService {
    session_id: SessionId,
    data: Arc<SessionData>,
    injector: LocalEventInjector,
    broadcaster: Arc<ChangeBroadcaster>,
    connection: Option<ConnectionHandle>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionEventService {
    /// Start building a service over an already loaded cache.
    pub fn builder(
        data: Arc<SessionData>,
        resource: Arc<dyn SessionResource>,
    ) -> SessionEventServiceBuilder {
        SessionEventServiceBuilder {
            data,
            resource,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
            broadcast_capacity: DEFAULT_CAPACITY,
            connection: None,
            on_error: None,
        }
    }

    /// The open session.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The cache this service maintains.
    pub fn session_data(&self) -> &Arc<SessionData> {
        &self.data
    }

    /// Feed a locally produced event into the pipeline. Dropped after close.
    pub fn inject(&self, event: RawEvent) -> bool {
        self.injector.inject(event)
    }

    /// Injector handle that outlives borrows of the service.
    pub fn injector(&self) -> LocalEventInjector {
        self.injector.clone()
    }

    /// Dataset change records.
    pub fn subscribe_datasets(&self) -> tokio::sync::broadcast::Receiver<ChangeRecord<Dataset>> {
        self.broadcaster.subscribe_datasets()
    }

    /// Job change records.
    pub fn subscribe_jobs(&self) -> tokio::sync::broadcast::Receiver<ChangeRecord<Job>> {
        self.broadcaster.subscribe_jobs()
    }

    /// Session metadata change records.
    pub fn subscribe_sessions(&self) -> tokio::sync::broadcast::Receiver<ChangeRecord<Session>> {
        self.broadcaster.subscribe_sessions()
    }

    /// Authorization revocations.
    pub fn subscribe_authorization(
        &self,
    ) -> tokio::sync::broadcast::Receiver<ChangeRecord<Session>> {
        self.broadcaster.subscribe_authorization()
    }

    /// Resync-needed signals.
    pub fn subscribe_failures(&self) -> tokio::sync::broadcast::Receiver<SyncFailure> {
        self.broadcaster.subscribe_failures()
    }

    /// Dataset records as a stream that skips lag.
    pub fn dataset_changes(&self) -> impl Stream<Item = ChangeRecord<Dataset>> + Unpin {
        into_stream(self.subscribe_datasets())
    }

    /// Job records as a stream that skips lag.
    pub fn job_changes(&self) -> impl Stream<Item = ChangeRecord<Job>> + Unpin {
        into_stream(self.subscribe_jobs())
    }

    /// Session records as a stream that skips lag.
    pub fn session_changes(&self) -> impl Stream<Item = ChangeRecord<Session>> + Unpin {
        into_stream(self.subscribe_sessions())
    }

    /// Authorization records as a stream that skips lag.
    pub fn authorization_changes(&self) -> impl Stream<Item = ChangeRecord<Session>> + Unpin {
        into_stream(self.subscribe_authorization())
    }

    /// State of the event connection. A service without a connection
    /// reports `Disconnected` until closed.
    pub fn connection_state(&self) -> ConnectionState {
        match &self.connection {
            Some(connection) => connection.state(),
            None if self.cancel.is_cancelled() => ConnectionState::Closed,
            None => ConnectionState::Disconnected,
        }
    }

    /// Connection state changes, if a connection was configured.
    pub fn watch_connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.connection.as_ref().map(ConnectionHandle::watch_state)
    }

    /// Reopen a failed connection.
    pub fn reconnect(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ConnectionHandle::reconnect)
    }

    /// Stop everything. In-flight and queued events are abandoned and
    /// nothing more is published. Idempotent.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!(session_id = %self.session_id, "closing session event service");
        if let Some(connection) = &self.connection {
            connection.close();
        }
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close and wait for the pipeline tasks to finish.
    pub async fn shutdown(mut self) {
        self.close();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for SessionEventService {
    fn drop(&mut self) {
        self.close();
    }
}
