//! Splits the ingestion queue into one queue per resource type.
//!
//! Each type queue feeds exactly one worker, which processes its events one
//! at a time. That gives strict ordering within a type while a slow fetch
//! for one type never holds up another.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use sessync_core::{RawEvent, ResourceType};

/// Senders of the four type queues.
pub struct TypeQueues {
    session: mpsc::UnboundedSender<RawEvent>,
    dataset: mpsc::UnboundedSender<RawEvent>,
    job: mpsc::UnboundedSender<RawEvent>,
    authorization: mpsc::UnboundedSender<RawEvent>,
}

/// Receivers of the four type queues, one per worker.
pub struct TypeReceivers {
    /// Session events.
    pub session: mpsc::UnboundedReceiver<RawEvent>,
    /// Dataset events.
    pub dataset: mpsc::UnboundedReceiver<RawEvent>,
    /// Job events.
    pub job: mpsc::UnboundedReceiver<RawEvent>,
    /// Authorization events.
    pub authorization: mpsc::UnboundedReceiver<RawEvent>,
}

/// Create the four type queues.
pub fn type_queues() -> (TypeQueues, TypeReceivers) {
    let (session, session_rx) = mpsc::unbounded_channel();
    let (dataset, dataset_rx) = mpsc::unbounded_channel();
    let (job, job_rx) = mpsc::unbounded_channel();
    let (authorization, authorization_rx) = mpsc::unbounded_channel();
    (
        TypeQueues {
            session,
            dataset,
            job,
            authorization,
        },
        TypeReceivers {
            session: session_rx,
            dataset: dataset_rx,
            job: job_rx,
            authorization: authorization_rx,
        },
    )
}

impl TypeQueues {
    /// Forward an event to the queue of its resource type.
    pub fn route(&self, event: RawEvent) -> bool {
        let queue = match event.resource_type {
            ResourceType::Session => &self.session,
            ResourceType::Dataset => &self.dataset,
            ResourceType::Job => &self.job,
            ResourceType::Authorization => &self.authorization,
        };
        trace!(%event, "routed");
        queue.send(event).is_ok()
    }
}

/// Drain the ingestion queue until it closes or `cancel` fires.
pub async fn run_router(
    mut ingest: mpsc::UnboundedReceiver<RawEvent>,
    queues: TypeQueues,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = ingest.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if !queues.route(event) {
            debug!("type queue closed, stopping router");
            break;
        }
    }
    debug!("router stopped");
}
