//! # sessync-core
//!
//! Shared vocabulary for session synchronization:
//!
//! - **Branded IDs**: [`SessionId`], [`DatasetId`], [`JobId`]
//! - **Entity records**: [`Session`], [`Dataset`], [`Job`], [`TypeTags`]
//! - **Events**: [`RawEvent`] as received from the event connection, and
//!   [`ChangeRecord`] as published to consumers
//! - **Errors**: [`FetchError`] and [`DecodeError`] via `thiserror`
//! - **Remote store contract**: the [`SessionResource`] trait

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod model;
pub mod resource;
pub mod type_tags;

pub use errors::{DecodeError, FetchError};
pub use events::{ChangeRecord, Operation, RawEvent, ResourceType, WireEvent};
pub use ids::{DatasetId, JobId, SessionId};
pub use model::{Dataset, Job, Session, TypeTags};
pub use resource::SessionResource;
