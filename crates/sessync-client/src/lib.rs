//! # sessync-client
//!
//! Implementations of [`SessionResource`](sessync_core::SessionResource):
//!
//! - [`HttpSessionResource`]: the session REST API over `reqwest`
//! - [`mock::MockSessionResource`]: in-memory store for deterministic tests

#![deny(unsafe_code)]

pub mod http;
pub mod mock;

pub use http::{ClientError, HttpSessionResource};
pub use mock::MockSessionResource;
