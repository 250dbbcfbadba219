//! Entity records owned by the remote store.
//!
//! The pipeline never edits these in place. A fetched record is wrapped in an
//! `Arc` and replaced wholesale on the next update, so anyone holding the old
//! `Arc` keeps a stable snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{DatasetId, JobId, SessionId};

/// Session metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session id.
    pub session_id: SessionId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Fields the core does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// Build a session record with no extra fields.
    pub fn new(session_id: SessionId, name: impl Into<String>) -> Self {
        Self {
            session_id,
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A dataset (file) in the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    /// Dataset id.
    pub dataset_id: DatasetId,
    /// File name.
    #[serde(default)]
    pub name: String,
    /// Fields the core does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dataset {
    /// Build a dataset record with no extra fields.
    pub fn new(dataset_id: impl Into<DatasetId>, name: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }
}

/// A tool run in the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job id.
    pub job_id: JobId,
    /// Tool that the job runs.
    #[serde(default)]
    pub tool_id: String,
    /// Server-reported state such as `RUNNING` or `COMPLETED`.
    #[serde(default)]
    pub state: Option<String>,
    /// Fields the core does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    /// Build a job record with no extra fields.
    pub fn new(job_id: impl Into<JobId>, tool_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            tool_id: tool_id.into(),
            state: None,
            extra: Map::new(),
        }
    }

    /// Set the job state.
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}

/// Derived classification of a dataset: tag name to optional tag value.
pub type TypeTags = BTreeMap<String, String>;
