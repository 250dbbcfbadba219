//! # sessync-sync
//!
//! Keeps the local replica of one open session consistent with the server
//! and tells the rest of the application what changed.
//!
//! ```text
//! connection ─┐
//!             ├─▶ ingestion queue ─▶ router ─┬─▶ session worker ───────▶ sessions
//! inject() ───┘                              ├─▶ dataset worker ─▶ tags ▶ datasets
//!                                            ├─▶ job worker ───────────▶ jobs
//!                                            └─▶ authorization worker ─▶ authorization
//! ```
//!
//! - Events of one resource type are processed strictly in arrival order;
//!   different types do not wait for each other.
//! - The cache is written before the corresponding record is published.
//! - Failed fetches publish a [`SyncFailure`] instead of a record.

#![deny(unsafe_code)]

pub mod broadcaster;
pub mod connection;
pub mod error;
pub mod ingest;
pub mod loader;
mod pipeline;
pub mod router;
pub mod service;
pub mod session_data;
pub mod synchronizer;
pub mod type_tags;

pub use broadcaster::{ChangeBroadcaster, into_stream};
pub use connection::{
    ConnectionConfig, ConnectionHandle, ConnectionState, events_base_from_rest, events_url_for,
};
pub use error::{CONNECTION_LOST_NOTICE, ConnectionError, SyncError, SyncFailure, SyncStage};
pub use ingest::{EventOrigin, EventSink, LocalEventInjector};
pub use loader::load_session_data;
pub use service::{DEFAULT_FETCH_TIMEOUT, SessionEventService, SessionEventServiceBuilder};
pub use session_data::{EntityMap, SessionData};
pub use synchronizer::{EntityOp, SyncAction, Synchronizer};
pub use type_tags::TypeTagUpdater;
