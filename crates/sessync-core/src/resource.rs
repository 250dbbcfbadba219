//! The remote store contract consumed by the synchronizers.

use async_trait::async_trait;

use crate::errors::FetchError;
use crate::ids::{DatasetId, JobId, SessionId};
use crate::model::{Dataset, Job, Session, TypeTags};

/// Read access to the authoritative session store.
///
/// Implemented over HTTP in `sessync-client`; tests use its mock.
#[async_trait]
pub trait SessionResource: Send + Sync {
    /// Fetch the session metadata.
    async fn get_session(&self, session_id: &SessionId) -> Result<Session, FetchError>;

    /// Fetch one dataset.
    async fn get_dataset(
        &self,
        session_id: &SessionId,
        dataset_id: &DatasetId,
    ) -> Result<Dataset, FetchError>;

    /// Fetch every dataset of the session.
    async fn get_datasets(&self, session_id: &SessionId) -> Result<Vec<Dataset>, FetchError>;

    /// Fetch one job.
    async fn get_job(&self, session_id: &SessionId, job_id: &JobId) -> Result<Job, FetchError>;

    /// Fetch every job of the session.
    async fn get_jobs(&self, session_id: &SessionId) -> Result<Vec<Job>, FetchError>;

    /// Compute or fetch the type tags of a dataset.
    async fn get_type_tags(
        &self,
        session_id: &SessionId,
        dataset: &Dataset,
    ) -> Result<TypeTags, FetchError>;
}
