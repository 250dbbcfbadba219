//! Router plus the four per-type workers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sessync_core::{RawEvent, ResourceType};

use crate::broadcaster::ChangeBroadcaster;
use crate::error::{SyncError, SyncFailure, SyncStage};
use crate::router::{run_router, type_queues};
use crate::synchronizer::Synchronizer;
use crate::type_tags::TypeTagUpdater;

/// Shared state of the workers.
pub(crate) struct Stages {
    pub(crate) synchronizer: Synchronizer,
    pub(crate) type_tags: TypeTagUpdater,
    pub(crate) broadcaster: Arc<ChangeBroadcaster>,
    pub(crate) cancel: CancellationToken,
}

impl Stages {
    fn fail(&self, event: RawEvent, stage: SyncStage, error: SyncError) {
        if !self.cancel.is_cancelled() {
            self.broadcaster.publish_failure(SyncFailure {
                event,
                stage,
                error,
            });
        }
    }

    async fn process_dataset(&self, event: RawEvent) {
        let record = match self.synchronizer.apply_dataset(&event).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(error) => return self.fail(event, SyncStage::Fetch, error),
        };
        match self.type_tags.update(record).await {
            Ok(record) if !self.cancel.is_cancelled() => self.broadcaster.publish_dataset(record),
            Ok(_) => {}
            Err(error) => self.fail(event, SyncStage::TypeTags, error),
        }
    }

    async fn process_job(&self, event: RawEvent) {
        match self.synchronizer.apply_job(&event).await {
            Ok(Some(record)) if !self.cancel.is_cancelled() => self.broadcaster.publish_job(record),
            Ok(_) => {}
            Err(error) => self.fail(event, SyncStage::Fetch, error),
        }
    }

    async fn process_session(&self, event: RawEvent) {
        match self.synchronizer.apply_session(&event).await {
            Ok(Some(record)) if !self.cancel.is_cancelled() => {
                self.broadcaster.publish_session(record);
            }
            Ok(_) => {}
            Err(error) => self.fail(event, SyncStage::Fetch, error),
        }
    }

    fn process_authorization(&self, event: &RawEvent) {
        if let Some(record) = self.synchronizer.apply_authorization(event) {
            if !self.cancel.is_cancelled() {
                self.broadcaster.publish_authorization(record);
            }
        }
    }
}

/// Process one type queue strictly in order. An event still in flight when
/// `cancel` fires is abandoned before it can publish.
async fn run_worker<F, Fut>(
    resource_type: ResourceType,
    mut rx: mpsc::UnboundedReceiver<RawEvent>,
    cancel: CancellationToken,
    mut handle: F,
) where
    F: FnMut(RawEvent) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = handle(event) => {}
        }
    }
    debug!(%resource_type, "worker stopped");
}

/// Spawn the router and the workers. Returns their join handles.
pub(crate) fn spawn(
    ingest: mpsc::UnboundedReceiver<RawEvent>,
    stages: Stages,
) -> Vec<JoinHandle<()>> {
    let cancel = stages.cancel.clone();
    let stages = Arc::new(stages);
    let (queues, receivers) = type_queues();

    let dataset = Arc::clone(&stages);
    let job = Arc::clone(&stages);
    let session = Arc::clone(&stages);
    let authorization = stages;

    vec![
        tokio::spawn(run_router(ingest, queues, cancel.clone())),
        tokio::spawn(run_worker(
            ResourceType::Dataset,
            receivers.dataset,
            cancel.clone(),
            move |event| {
                let stages = Arc::clone(&dataset);
                async move { stages.process_dataset(event).await }
            },
        )),
        tokio::spawn(run_worker(
            ResourceType::Job,
            receivers.job,
            cancel.clone(),
            move |event| {
                let stages = Arc::clone(&job);
                async move { stages.process_job(event).await }
            },
        )),
        tokio::spawn(run_worker(
            ResourceType::Session,
            receivers.session,
            cancel.clone(),
            move |event| {
                let stages = Arc::clone(&session);
                async move { stages.process_session(event).await }
            },
        )),
        tokio::spawn(run_worker(
            ResourceType::Authorization,
            receivers.authorization,
            cancel,
            move |event| {
                let stages = Arc::clone(&authorization);
                async move { stages.process_authorization(&event) }
            },
        )),
    ]
}
