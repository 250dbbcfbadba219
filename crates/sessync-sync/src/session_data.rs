//! The local replica of an open session.
//!
//! Single writer: only the pipeline mutates the maps (the mutators are
//! crate-private). Any number of readers may take snapshots concurrently;
//! every map sits behind its own lock and values are shared `Arc`s that are
//! replaced, never edited.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use sessync_core::{Dataset, DatasetId, Job, JobId, Session, SessionId, TypeTags};

/// A locked id → record map.
#[derive(Debug)]
pub struct EntityMap<K, V> {
    inner: RwLock<HashMap<K, Arc<V>>>,
}

impl<K: Eq + Hash, V> EntityMap<K, V> {
    fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Current value for `id`.
    pub fn get(&self, id: &K) -> Option<Arc<V>> {
        self.inner.read().get(id).cloned()
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &K) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Snapshot of all values, in no particular order.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.inner.read().values().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Replace the entry, returning the previous value.
    pub(crate) fn insert(&self, id: K, value: Arc<V>) -> Option<Arc<V>> {
        self.inner.write().insert(id, value)
    }

    /// Remove the entry, returning the previous value.
    pub(crate) fn remove(&self, id: &K) -> Option<Arc<V>> {
        self.inner.write().remove(id)
    }
}

/// Root aggregate of an open session.
#[derive(Debug)]
pub struct SessionData {
    session: RwLock<Arc<Session>>,
    datasets: EntityMap<DatasetId, Dataset>,
    jobs: EntityMap<JobId, Job>,
    dataset_type_tags: EntityMap<DatasetId, TypeTags>,
}

impl SessionData {
    /// Start from the session record with empty maps.
    pub fn new(session: Session) -> Self {
        Self {
            session: RwLock::new(Arc::new(session)),
            datasets: EntityMap::new(),
            jobs: EntityMap::new(),
            dataset_type_tags: EntityMap::new(),
        }
    }

    /// Bulk-load datasets.
    #[must_use]
    pub fn with_datasets(self, datasets: impl IntoIterator<Item = Dataset>) -> Self {
        for dataset in datasets {
            let _ = self
                .datasets
                .insert(dataset.dataset_id.clone(), Arc::new(dataset));
        }
        self
    }

    /// Bulk-load jobs.
    #[must_use]
    pub fn with_jobs(self, jobs: impl IntoIterator<Item = Job>) -> Self {
        for job in jobs {
            let _ = self.jobs.insert(job.job_id.clone(), Arc::new(job));
        }
        self
    }

    /// Bulk-load type tags.
    #[must_use]
    pub fn with_type_tags(self, tags: impl IntoIterator<Item = (DatasetId, TypeTags)>) -> Self {
        for (id, tags) in tags {
            let _ = self.dataset_type_tags.insert(id, Arc::new(tags));
        }
        self
    }

    /// Current session record.
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session.read())
    }

    /// Id of the session.
    pub fn session_id(&self) -> SessionId {
        self.session.read().session_id.clone()
    }

    /// Dataset map.
    pub fn datasets(&self) -> &EntityMap<DatasetId, Dataset> {
        &self.datasets
    }

    /// Job map.
    pub fn jobs(&self) -> &EntityMap<JobId, Job> {
        &self.jobs
    }

    /// Type-tag map, keyed by dataset id.
    pub fn dataset_type_tags(&self) -> &EntityMap<DatasetId, TypeTags> {
        &self.dataset_type_tags
    }

    /// Shorthand for one dataset.
    pub fn dataset(&self, id: &DatasetId) -> Option<Arc<Dataset>> {
        self.datasets.get(id)
    }

    /// Shorthand for one job.
    pub fn job(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.get(id)
    }

    /// Shorthand for the type tags of one dataset.
    pub fn type_tags(&self, id: &DatasetId) -> Option<Arc<TypeTags>> {
        self.dataset_type_tags.get(id)
    }

    /// Whether a dataset carries a tag.
    pub fn has_type_tag(&self, id: &DatasetId, tag: &str) -> bool {
        self.type_tags(id).is_some_and(|tags| tags.contains_key(tag))
    }

    pub(crate) fn replace_session(&self, session: Arc<Session>) -> Arc<Session> {
        std::mem::replace(&mut *self.session.write(), session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> SessionData {
        SessionData::new(Session::new(SessionId::from_raw("s1"), "demo"))
    }

    #[test]
    fn bulk_load_and_read() {
        let data = data()
            .with_datasets([Dataset::new("d1", "a.txt"), Dataset::new("d2", "b.tsv")])
            .with_jobs([Job::new("j1", "norm.R")])
            .with_type_tags([(DatasetId::from_raw("d1"), TypeTags::from([("TEXT".into(), String::new())]))]);

        assert_eq!(data.datasets().len(), 2);
        assert_eq!(data.dataset(&"d2".into()).unwrap().name, "b.tsv");
        assert_eq!(data.job(&"j1".into()).unwrap().tool_id, "norm.R");
        assert!(data.has_type_tag(&"d1".into(), "TEXT"));
        assert!(!data.has_type_tag(&"d2".into(), "TSV"));
        assert_eq!(data.session_id().as_str(), "s1");
    }

    #[test]
    fn insert_returns_previous_snapshot() {
        let data = data();
        let first = Arc::new(Dataset::new("d1", "a.txt"));
        assert!(data.datasets().insert("d1".into(), Arc::clone(&first)).is_none());

        let held = data.dataset(&"d1".into()).unwrap();
        let old = data
            .datasets()
            .insert("d1".into(), Arc::new(Dataset::new("d1", "renamed.txt")))
            .unwrap();
        assert!(Arc::ptr_eq(&old, &first));
        // Readers holding the old Arc still see the old value.
        assert_eq!(held.name, "a.txt");
        assert_eq!(data.dataset(&"d1".into()).unwrap().name, "renamed.txt");
    }

    #[test]
    fn replace_session_hands_back_old_reference() {
        let data = data();
        let before = data.session();
        let old = data.replace_session(Arc::new(Session::new(SessionId::from_raw("s1"), "renamed")));
        assert!(Arc::ptr_eq(&before, &old));
        assert_eq!(data.session().name, "renamed");
        assert_eq!(before.name, "demo");
    }
}
