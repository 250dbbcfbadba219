//! Keeps `dataset_type_tags` in step with `datasets`.
//!
//! Runs on the dataset worker after the dataset cache write and before the
//! record is published, so a subscriber that receives a dataset record can
//! already read that dataset's tags.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use sessync_core::{ChangeRecord, Dataset, DatasetId, SessionId, SessionResource};

use crate::error::SyncError;
use crate::session_data::SessionData;
use crate::synchronizer::bounded_fetch;

/// Refreshes or clears type tags for each dataset change.
pub struct TypeTagUpdater {
    session_id: SessionId,
    data: Arc<SessionData>,
    resource: Arc<dyn SessionResource>,
    fetch_timeout: Option<Duration>,
}

impl TypeTagUpdater {
    /// Build an updater over `data`.
    pub fn new(
        data: Arc<SessionData>,
        resource: Arc<dyn SessionResource>,
        fetch_timeout: Option<Duration>,
    ) -> Self {
        Self {
            session_id: data.session_id(),
            data,
            resource,
            fetch_timeout,
        }
    }

    /// Update tags for the dataset in `record` and pass the record through.
    ///
    /// On failure the dataset entry stays, its stale tags are removed and
    /// the error is returned so the record can be withheld.
    #[instrument(skip_all, fields(event = %record.event))]
    pub async fn update(
        &self,
        record: ChangeRecord<Dataset>,
    ) -> Result<ChangeRecord<Dataset>, SyncError> {
        let Some(dataset) = record.new_value.clone() else {
            let id = record.old_value.as_ref().map_or_else(
                || DatasetId::from_raw(record.event.resource_id.as_str()),
                |old| old.dataset_id.clone(),
            );
            let _ = self.data.dataset_type_tags().remove(&id);
            debug!(dataset_id = %id, "type tags cleared");
            return Ok(record);
        };

        let id = dataset.dataset_id.clone();
        match bounded_fetch(
            self.fetch_timeout,
            self.resource.get_type_tags(&self.session_id, &dataset),
        )
        .await
        {
            Ok(tags) => {
                debug!(dataset_id = %id, count = tags.len(), "type tags updated");
                let _ = self.data.dataset_type_tags().insert(id, Arc::new(tags));
                Ok(record)
            }
            Err(error) => {
                let _ = self.data.dataset_type_tags().remove(&id);
                Err(error)
            }
        }
    }
}
