//! In-memory [`SessionResource`] for deterministic tests.
//!
//! Values are served from maps that the test mutates between events, the way
//! the real server changes state before it sends a notification. Failures
//! and fetch gates can be programmed per call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use sessync_core::type_tags::derive_type_tags;
use sessync_core::{
    Dataset, DatasetId, FetchError, Job, JobId, Session, SessionId, SessionResource, TypeTags,
};

#[derive(Default)]
struct MockState {
    session: Option<Session>,
    datasets: HashMap<DatasetId, Dataset>,
    jobs: HashMap<JobId, Job>,
    type_tags: HashMap<DatasetId, TypeTags>,
    session_failure: Option<FetchError>,
    dataset_failures: HashMap<DatasetId, FetchError>,
    job_failures: HashMap<JobId, FetchError>,
    type_tag_failures: HashMap<DatasetId, FetchError>,
    dataset_gates: VecDeque<oneshot::Receiver<()>>,
    type_tag_gates: VecDeque<oneshot::Receiver<()>>,
}

/// Mock store with call counters.
#[derive(Default)]
pub struct MockSessionResource {
    state: Mutex<MockState>,
    session_fetches: AtomicUsize,
    dataset_fetches: AtomicUsize,
    job_fetches: AtomicUsize,
    type_tag_fetches: AtomicUsize,
}

impl MockSessionResource {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session record returned by `get_session`.
    pub fn set_session(&self, session: Session) {
        self.state.lock().session = Some(session);
    }

    /// Add or replace a dataset.
    pub fn put_dataset(&self, dataset: Dataset) {
        let _ = self
            .state
            .lock()
            .datasets
            .insert(dataset.dataset_id.clone(), dataset);
    }

    /// Remove a dataset; later fetches answer 404.
    pub fn remove_dataset(&self, dataset_id: &DatasetId) {
        let _ = self.state.lock().datasets.remove(dataset_id);
    }

    /// Add or replace a job.
    pub fn put_job(&self, job: Job) {
        let _ = self.state.lock().jobs.insert(job.job_id.clone(), job);
    }

    /// Serve fixed type tags for a dataset instead of deriving them.
    pub fn put_type_tags(&self, dataset_id: impl Into<DatasetId>, tags: TypeTags) {
        let _ = self.state.lock().type_tags.insert(dataset_id.into(), tags);
    }

    /// Make `get_session` fail until cleared.
    pub fn fail_session(&self, error: Option<FetchError>) {
        self.state.lock().session_failure = error;
    }

    /// Make `get_dataset` fail for one id.
    pub fn fail_dataset(&self, dataset_id: impl Into<DatasetId>, error: FetchError) {
        let _ = self
            .state
            .lock()
            .dataset_failures
            .insert(dataset_id.into(), error);
    }

    /// Make `get_job` fail for one id.
    pub fn fail_job(&self, job_id: impl Into<JobId>, error: FetchError) {
        let _ = self.state.lock().job_failures.insert(job_id.into(), error);
    }

    /// Make `get_type_tags` fail for one dataset.
    pub fn fail_type_tags(&self, dataset_id: impl Into<DatasetId>, error: FetchError) {
        let _ = self
            .state
            .lock()
            .type_tag_failures
            .insert(dataset_id.into(), error);
    }

    /// Hold the next `get_dataset` call until the returned sender fires or
    /// is dropped. Gates are consumed in call order.
    pub fn gate_next_dataset_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().dataset_gates.push_back(rx);
        tx
    }

    /// Hold the next `get_type_tags` call, like
    /// [`gate_next_dataset_fetch`](Self::gate_next_dataset_fetch).
    pub fn gate_next_type_tag_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().type_tag_gates.push_back(rx);
        tx
    }

    /// Number of `get_session` calls started.
    pub fn session_fetches(&self) -> usize {
        self.session_fetches.load(Ordering::SeqCst)
    }

    /// Number of `get_dataset` calls started.
    pub fn dataset_fetches(&self) -> usize {
        self.dataset_fetches.load(Ordering::SeqCst)
    }

    /// Number of `get_job` calls started.
    pub fn job_fetches(&self) -> usize {
        self.job_fetches.load(Ordering::SeqCst)
    }

    /// Number of `get_type_tags` calls started.
    pub fn type_tag_fetches(&self) -> usize {
        self.type_tag_fetches.load(Ordering::SeqCst)
    }
}

fn not_found(what: &str, id: &str) -> FetchError {
    FetchError::Http {
        status: 404,
        status_text: "Not Found".into(),
        body: format!("{what} {id} not found"),
    }
}

#[async_trait]
impl SessionResource for MockSessionResource {
    async fn get_session(&self, session_id: &SessionId) -> Result<Session, FetchError> {
        let _ = self.session_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if let Some(err) = &state.session_failure {
            return Err(err.clone());
        }
        state
            .session
            .clone()
            .ok_or_else(|| not_found("session", session_id.as_str()))
    }

    async fn get_dataset(
        &self,
        _session_id: &SessionId,
        dataset_id: &DatasetId,
    ) -> Result<Dataset, FetchError> {
        let _ = self.dataset_fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.lock().dataset_gates.pop_front();
        if let Some(gate) = gate {
            // A dropped sender releases the gate too.
            let _ = gate.await;
        }
        let state = self.state.lock();
        if let Some(err) = state.dataset_failures.get(dataset_id) {
            return Err(err.clone());
        }
        state
            .datasets
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| not_found("dataset", dataset_id.as_str()))
    }

    async fn get_datasets(&self, _session_id: &SessionId) -> Result<Vec<Dataset>, FetchError> {
        Ok(self.state.lock().datasets.values().cloned().collect())
    }

    async fn get_job(&self, _session_id: &SessionId, job_id: &JobId) -> Result<Job, FetchError> {
        let _ = self.job_fetches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if let Some(err) = state.job_failures.get(job_id) {
            return Err(err.clone());
        }
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| not_found("job", job_id.as_str()))
    }

    async fn get_jobs(&self, _session_id: &SessionId) -> Result<Vec<Job>, FetchError> {
        Ok(self.state.lock().jobs.values().cloned().collect())
    }

    async fn get_type_tags(
        &self,
        _session_id: &SessionId,
        dataset: &Dataset,
    ) -> Result<TypeTags, FetchError> {
        let _ = self.type_tag_fetches.fetch_add(1, Ordering::SeqCst);
        let gate = self.state.lock().type_tag_gates.pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let state = self.state.lock();
        if let Some(err) = state.type_tag_failures.get(&dataset.dataset_id) {
            return Err(err.clone());
        }
        Ok(state
            .type_tags
            .get(&dataset.dataset_id)
            .cloned()
            .unwrap_or_else(|| derive_type_tags(dataset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn sid() -> SessionId {
        SessionId::from_raw("s1")
    }

    #[tokio::test]
    async fn serves_current_values() {
        let mock = MockSessionResource::new();
        mock.put_dataset(Dataset::new("d1", "a.txt"));
        let d = mock.get_dataset(&sid(), &"d1".into()).await.unwrap();
        assert_eq!(d.name, "a.txt");

        mock.put_dataset(Dataset::new("d1", "b.txt"));
        let d = mock.get_dataset(&sid(), &"d1".into()).await.unwrap();
        assert_eq!(d.name, "b.txt");
        assert_eq!(mock.dataset_fetches(), 2);
    }

    #[tokio::test]
    async fn missing_records_are_404() {
        let mock = MockSessionResource::new();
        let err = mock.get_job(&sid(), &"j1".into()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn programmed_failures() {
        let mock = MockSessionResource::new();
        mock.put_dataset(Dataset::new("d1", "a.txt"));
        mock.fail_type_tags("d1", FetchError::Decode("bad".into()));
        let dataset = Dataset::new("d1", "a.txt");
        assert_matches!(
            mock.get_type_tags(&sid(), &dataset).await,
            Err(FetchError::Decode(_))
        );

        mock.fail_session(Some(FetchError::Connection { url: "u".into() }));
        assert!(mock.get_session(&sid()).await.is_err());
        mock.fail_session(None);
        mock.set_session(Session::new(sid(), "demo"));
        assert_eq!(mock.get_session(&sid()).await.unwrap().name, "demo");
    }

    #[tokio::test]
    async fn gate_holds_fetch_until_released() {
        let mock = Arc::new(MockSessionResource::new());
        mock.put_dataset(Dataset::new("d1", "a.txt"));
        let release = mock.gate_next_dataset_fetch();

        let m = Arc::clone(&mock);
        let fetch = tokio::spawn(async move { m.get_dataset(&sid(), &"d1".into()).await });
        tokio::task::yield_now().await;
        assert_eq!(mock.dataset_fetches(), 1);
        assert!(!fetch.is_finished());

        release.send(()).unwrap();
        assert!(fetch.await.unwrap().is_ok());
    }
}
