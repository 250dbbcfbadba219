//! The single ordered entry point of the pipeline.
//!
//! Events from the connection and from local injection go through the same
//! unbounded queue, so downstream stages cannot tell them apart and the
//! arrival order is the only order that matters.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sessync_core::RawEvent;

/// Where an event entered the pipeline. Only used for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOrigin {
    /// Received on the event connection.
    Remote,
    /// Injected by the application.
    Local,
}

/// Producer half of the ingestion queue.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<RawEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Enqueue an event. Returns `false` if the pipeline is closed and the
    /// event was dropped.
    pub fn push(&self, event: RawEvent, origin: EventOrigin) -> bool {
        if self.cancel.is_cancelled() {
            debug!(%event, ?origin, "pipeline closed, dropping event");
            return false;
        }
        debug!(%event, ?origin, "event ingested");
        self.tx.send(event).is_ok()
    }
}

/// Lets the application act as its own event source.
///
/// Used after local mutations whose server notification may arrive late or
/// not at all. Injected events are processed exactly like remote ones.
#[derive(Clone)]
pub struct LocalEventInjector {
    sink: EventSink,
}

impl LocalEventInjector {
    /// Wrap a sink.
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }

    /// Enqueue a locally produced event.
    pub fn inject(&self, event: RawEvent) -> bool {
        self.sink.push(event, EventOrigin::Local)
    }
}

/// Create the ingestion queue. Pushes fail once `cancel` fires.
pub fn ingestion_channel(
    cancel: CancellationToken,
) -> (EventSink, mpsc::UnboundedReceiver<RawEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx, cancel }, rx)
}
