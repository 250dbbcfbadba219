//! Initial bulk load of a session cache.

use futures::future::try_join_all;
use tracing::{info, instrument};

use sessync_core::{FetchError, SessionId, SessionResource};

use crate::session_data::SessionData;

/// Fetch the session, its datasets and jobs, and the type tags of every
/// dataset.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn load_session_data(
    resource: &dyn SessionResource,
    session_id: &SessionId,
) -> Result<SessionData, FetchError> {
    let session = resource.get_session(session_id).await?;
    let datasets = resource.get_datasets(session_id).await?;
    let jobs = resource.get_jobs(session_id).await?;
    let tags = try_join_all(
        datasets
            .iter()
            .map(|dataset| resource.get_type_tags(session_id, dataset)),
    )
    .await?;

    info!(datasets = datasets.len(), jobs = jobs.len(), "session loaded");
    let ids: Vec<_> = datasets.iter().map(|d| d.dataset_id.clone()).collect();
    Ok(SessionData::new(session)
        .with_datasets(datasets)
        .with_jobs(jobs)
        .with_type_tags(ids.into_iter().zip(tags)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sessync_client::MockSessionResource;
    use sessync_core::{Dataset, Job, Session};

    #[tokio::test]
    async fn loads_everything_with_tags() {
        let mock = MockSessionResource::new();
        mock.set_session(Session::new(SessionId::from_raw("s1"), "demo"));
        mock.put_dataset(Dataset::new("d1", "reads.fq.gz"));
        mock.put_dataset(Dataset::new("d2", "table.tsv"));
        mock.put_job(Job::new("j1", "fastqc"));

        let data = load_session_data(&mock, &SessionId::from_raw("s1")).await.unwrap();
        assert_eq!(data.datasets().len(), 2);
        assert_eq!(data.jobs().len(), 1);
        assert!(data.has_type_tag(&"d1".into(), "FASTQ"));
        assert!(data.has_type_tag(&"d2".into(), "TSV"));
        assert_eq!(mock.type_tag_fetches(), 2);
    }

    #[tokio::test]
    async fn missing_session_fails_the_load() {
        let mock = MockSessionResource::new();
        let err = load_session_data(&mock, &SessionId::from_raw("s1")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn tag_failure_fails_the_load() {
        let mock = MockSessionResource::new();
        mock.set_session(Session::new(SessionId::from_raw("s1"), "demo"));
        mock.put_dataset(Dataset::new("d1", "a.txt"));
        mock.fail_type_tags("d1", FetchError::Decode("bad".into()));

        let err = load_session_data(&mock, &SessionId::from_raw("s1")).await.unwrap_err();
        assert_matches!(err, FetchError::Decode(_));
    }
}
