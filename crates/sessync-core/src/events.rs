//! Change notifications and the records published for them.
//!
//! A [`RawEvent`] only names what changed. The synchronizers fetch the
//! current value and publish a [`ChangeRecord`] with the before/after
//! snapshots.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

/// Kind of resource a notification refers to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// Session metadata.
    Session,
    /// A dataset.
    Dataset,
    /// A job.
    Job,
    /// The caller's access to the session.
    Authorization,
}

impl ResourceType {
    /// All resource types, in routing order.
    pub const ALL: [Self; 4] = [Self::Session, Self::Dataset, Self::Job, Self::Authorization];

    /// Wire name of the resource type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "SESSION",
            Self::Dataset => "DATASET",
            Self::Job => "JOB",
            Self::Authorization => "AUTHORIZATION",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SESSION" => Ok(Self::Session),
            "DATASET" => Ok(Self::Dataset),
            "JOB" => Ok(Self::Job),
            "AUTHORIZATION" => Ok(Self::Authorization),
            other => Err(DecodeError::UnknownResourceType(other.to_owned())),
        }
    }
}

/// What happened to the resource.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// The resource was created.
    Create,
    /// The resource was modified.
    Update,
    /// The resource was removed.
    Delete,
}

impl Operation {
    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(DecodeError::UnknownOperation(other.to_owned())),
        }
    }
}

/// Inbound message exactly as the server sends it.
///
/// Fields are kept as strings so that an unknown value can be reported by
/// name instead of failing deserialization as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    /// `SESSION`, `DATASET`, `JOB` or `AUTHORIZATION`.
    pub resource_type: String,
    /// `CREATE`, `UPDATE` or `DELETE`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Id of the changed resource.
    #[serde(default)]
    pub resource_id: String,
}

/// A change notification, from the connection or injected locally.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Kind of resource.
    pub resource_type: ResourceType,
    /// What happened.
    #[serde(rename = "type")]
    pub operation: Operation,
    /// Id of the changed resource.
    pub resource_id: String,
}

impl RawEvent {
    /// Build an event.
    pub fn new(
        resource_type: ResourceType,
        operation: Operation,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            operation,
            resource_id: resource_id.into(),
        }
    }

    /// Shorthand for a dataset event.
    pub fn dataset(operation: Operation, dataset_id: impl Into<String>) -> Self {
        Self::new(ResourceType::Dataset, operation, dataset_id)
    }

    /// Shorthand for a job event.
    pub fn job(operation: Operation, job_id: impl Into<String>) -> Self {
        Self::new(ResourceType::Job, operation, job_id)
    }

    /// Decode a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let wire: WireEvent = serde_json::from_str(text)?;
        Self::try_from(wire)
    }
}

impl TryFrom<WireEvent> for RawEvent {
    type Error = DecodeError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            resource_type: wire.resource_type.parse()?,
            operation: wire.event_type.parse()?,
            resource_id: wire.resource_id,
        })
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.resource_type, self.operation, self.resource_id)
    }
}

/// The unit published to consumers: the event plus before/after snapshots.
///
/// `old_value` is the `Arc` that was in the cache before the change. It is
/// shared, not copied, so it is a faithful pre-image only because cached
/// records are never mutated in place.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord<T> {
    /// The event that caused the change.
    pub event: RawEvent,
    /// Value before the change, if any.
    pub old_value: Option<Arc<T>>,
    /// Value after the change, if any.
    pub new_value: Option<Arc<T>>,
}

impl<T> ChangeRecord<T> {
    /// Build a record.
    pub fn new(event: RawEvent, old_value: Option<Arc<T>>, new_value: Option<Arc<T>>) -> Self {
        Self {
            event,
            old_value,
            new_value,
        }
    }

    /// Whether the resource no longer exists after this change.
    pub fn is_removal(&self) -> bool {
        self.new_value.is_none()
    }
}

impl<T> Clone for ChangeRecord<T> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
            old_value: self.old_value.clone(),
            new_value: self.new_value.clone(),
        }
    }
}
