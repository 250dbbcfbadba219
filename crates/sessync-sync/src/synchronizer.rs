//! Turns raw events into change records.
//!
//! The server's notifications carry no payload, so every create or update is
//! answered by fetching the authoritative value and swapping it into the
//! cache. The swap's return value is the pre-image that goes into the record.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use sessync_core::{
    ChangeRecord, Dataset, DatasetId, FetchError, Job, JobId, Operation, RawEvent, ResourceType,
    Session, SessionId, SessionResource,
};

use crate::error::SyncError;
use crate::session_data::{EntityMap, SessionData};

/// One create/update/delete against a cached entity map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityOp<K> {
    /// Fetch and insert.
    Create(K),
    /// Fetch and replace.
    Update(K),
    /// Remove locally, no fetch.
    Delete(K),
}

impl<K> EntityOp<K> {
    fn from_event(event: &RawEvent) -> Self
    where
        K: for<'a> From<&'a str>,
    {
        let id = K::from(event.resource_id.as_str());
        match event.operation {
            Operation::Create => Self::Create(id),
            Operation::Update => Self::Update(id),
            Operation::Delete => Self::Delete(id),
        }
    }

    /// Id the operation applies to.
    pub fn id(&self) -> &K {
        match self {
            Self::Create(id) | Self::Update(id) | Self::Delete(id) => id,
        }
    }
}

/// What a raw event asks the pipeline to do.
///
/// Every (resource type, operation) pair maps to exactly one variant, so a
/// new resource type or operation fails to compile here instead of being
/// dropped silently downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncAction {
    /// Dataset create, update or delete.
    Dataset(EntityOp<DatasetId>),
    /// Job create, update or delete.
    Job(EntityOp<JobId>),
    /// Session metadata changed.
    SessionUpdate,
    /// Access to the session was revoked.
    AuthorizationRevoked,
    /// Combination with no defined handling.
    Unrecognized,
}

impl SyncAction {
    /// Classify an event.
    pub fn classify(event: &RawEvent) -> Self {
        match (event.resource_type, event.operation) {
            (ResourceType::Dataset, _) => Self::Dataset(EntityOp::from_event(event)),
            (ResourceType::Job, _) => Self::Job(EntityOp::from_event(event)),
            (ResourceType::Session, Operation::Update) => Self::SessionUpdate,
            (ResourceType::Session, Operation::Create | Operation::Delete) => Self::Unrecognized,
            (ResourceType::Authorization, Operation::Delete) => Self::AuthorizationRevoked,
            (ResourceType::Authorization, Operation::Create | Operation::Update) => {
                Self::Unrecognized
            }
        }
    }
}

/// Await a fetch, bounded by `limit` when one is set.
pub(crate) async fn bounded_fetch<T>(
    limit: Option<Duration>,
    request: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, SyncError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_| SyncError::Timeout(limit))?
            .map_err(SyncError::from),
        None => request.await.map_err(SyncError::from),
    }
}

fn upsert<K, T>(event: &RawEvent, op: &EntityOp<K>, map: &EntityMap<K, T>, remote: T) -> ChangeRecord<T>
where
    K: Eq + Hash + Clone,
{
    let remote = Arc::new(remote);
    let replaced = map.insert(op.id().clone(), Arc::clone(&remote));
    // A create never reports a pre-image, even over a stale entry.
    let old = match op {
        EntityOp::Create(_) => None,
        EntityOp::Update(_) | EntityOp::Delete(_) => replaced,
    };
    ChangeRecord::new(event.clone(), old, Some(remote))
}

fn remove<K, T>(event: &RawEvent, id: &K, map: &EntityMap<K, T>) -> ChangeRecord<T>
where
    K: Eq + Hash,
{
    ChangeRecord::new(event.clone(), map.remove(id), None)
}

fn log_unrecognized(event: &RawEvent) {
    warn!(
        resource_type = %event.resource_type,
        operation = %event.operation,
        resource_id = %event.resource_id,
        "unrecognized event, dropping"
    );
}

/// Applies events of every resource type to one session's cache.
pub struct Synchronizer {
    session_id: SessionId,
    data: Arc<SessionData>,
    resource: Arc<dyn SessionResource>,
    fetch_timeout: Option<Duration>,
}

impl Synchronizer {
    /// Build a synchronizer over `data`.
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

    /// Dataset create, update or delete.
    ///
    /// `Ok(None)` means the event was dropped as unrecognized. On `Err` the
    /// cache is untouched.
    #[instrument(skip_all, fields(event = %event))]
    pub async fn apply_dataset(
        &self,
        event: &RawEvent,
    ) -> Result<Option<ChangeRecord<Dataset>>, SyncError> {
        let op = match SyncAction::classify(event) {
            SyncAction::Dataset(op) => op,
            _ => {
                log_unrecognized(event);
                return Ok(None);
            }
        };
        let map = self.data.datasets();
        let record = match &op {
            EntityOp::Delete(id) => remove(event, id, map),
            EntityOp::Create(id) | EntityOp::Update(id) => {
                let remote = bounded_fetch(
                    self.fetch_timeout,
                    self.resource.get_dataset(&self.session_id, id),
                )
                .await?;
                upsert(event, &op, map, remote)
            }
        };
        debug!("dataset synchronized");
        Ok(Some(record))
    }

    /// Job create, update or delete.
    #[instrument(skip_all, fields(event = %event))]
    pub async fn apply_job(&self, event: &RawEvent) -> Result<Option<ChangeRecord<Job>>, SyncError> {
        let op = match SyncAction::classify(event) {
            SyncAction::Job(op) => op,
            _ => {
                log_unrecognized(event);
                return Ok(None);
            }
        };
        let map = self.data.jobs();
        let record = match &op {
            EntityOp::Delete(id) => remove(event, id, map),
            EntityOp::Create(id) | EntityOp::Update(id) => {
                let remote = bounded_fetch(
                    self.fetch_timeout,
                    self.resource.get_job(&self.session_id, id),
                )
                .await?;
                upsert(event, &op, map, remote)
            }
        };
        debug!("job synchronized");
        Ok(Some(record))
    }

    /// Session metadata update. The fetch ignores `resource_id` and always
    /// targets the open session.
    #[instrument(skip_all, fields(event = %event))]
    pub async fn apply_session(
        &self,
        event: &RawEvent,
    ) -> Result<Option<ChangeRecord<Session>>, SyncError> {
        if SyncAction::classify(event) != SyncAction::SessionUpdate {
            log_unrecognized(event);
            return Ok(None);
        }
        let remote = Arc::new(
            bounded_fetch(self.fetch_timeout, self.resource.get_session(&self.session_id)).await?,
        );
        let old = self.data.replace_session(Arc::clone(&remote));
        debug!("session synchronized");
        Ok(Some(ChangeRecord::new(event.clone(), Some(old), Some(remote))))
    }

    /// Authorization revocation. Touches neither the cache nor the network.
    pub fn apply_authorization(&self, event: &RawEvent) -> Option<ChangeRecord<Session>> {
        if SyncAction::classify(event) != SyncAction::AuthorizationRevoked {
            log_unrecognized(event);
            return None;
        }
        warn!(session_id = %self.session_id, "session authorization revoked");
        Some(ChangeRecord::new(event.clone(), Some(self.data.session()), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sessync_client::MockSessionResource;
    use sessync_logging::test_utils::capture_logs;
    use tracing::Level;

    fn setup() -> (Arc<SessionData>, Arc<MockSessionResource>, Synchronizer) {
        let data = Arc::new(SessionData::new(Session::new(SessionId::from_raw("s1"), "demo")));
        let mock = Arc::new(MockSessionResource::new());
        mock.set_session(Session::new(SessionId::from_raw("s1"), "demo"));
        let sync = Synchronizer::new(Arc::clone(&data), mock.clone(), None);
        (data, mock, sync)
    }

    #[test]
    fn classify_covers_every_pair() {
        let ds = |op| SyncAction::classify(&RawEvent::dataset(op, "d1"));
        assert_eq!(ds(Operation::Create), SyncAction::Dataset(EntityOp::Create("d1".into())));
        assert_eq!(ds(Operation::Delete), SyncAction::Dataset(EntityOp::Delete("d1".into())));

        let of = |ty, op| SyncAction::classify(&RawEvent::new(ty, op, "x"));
        assert_eq!(of(ResourceType::Job, Operation::Update), SyncAction::Job(EntityOp::Update("x".into())));
        assert_eq!(of(ResourceType::Session, Operation::Update), SyncAction::SessionUpdate);
        assert_eq!(of(ResourceType::Session, Operation::Create), SyncAction::Unrecognized);
        assert_eq!(of(ResourceType::Session, Operation::Delete), SyncAction::Unrecognized);
        assert_eq!(
            of(ResourceType::Authorization, Operation::Delete),
            SyncAction::AuthorizationRevoked
        );
        assert_eq!(of(ResourceType::Authorization, Operation::Update), SyncAction::Unrecognized);
    }

    #[tokio::test]
    async fn create_fetches_and_inserts() {
        let (data, mock, sync) = setup();
        mock.put_dataset(Dataset::new("d1", "reads.fq"));

        let record = sync
            .apply_dataset(&RawEvent::dataset(Operation::Create, "d1"))
            .await
            .unwrap()
            .unwrap();

        assert!(record.old_value.is_none());
        assert_eq!(record.new_value.as_deref().unwrap().name, "reads.fq");
        assert!(Arc::ptr_eq(
            record.new_value.as_ref().unwrap(),
            &data.dataset(&"d1".into()).unwrap()
        ));
    }

    #[tokio::test]
    async fn update_reports_previous_snapshot() {
        let (data, mock, sync) = setup();
        let _ = data
            .datasets()
            .insert("d1".into(), Arc::new(Dataset::new("d1", "a.txt")));
        let before = data.dataset(&"d1".into()).unwrap();
        mock.put_dataset(Dataset::new("d1", "b.txt"));

        let record = sync
            .apply_dataset(&RawEvent::dataset(Operation::Update, "d1"))
            .await
            .unwrap()
            .unwrap();

        assert!(Arc::ptr_eq(record.old_value.as_ref().unwrap(), &before));
        assert_eq!(record.new_value.unwrap().name, "b.txt");
        assert_eq!(data.dataset(&"d1".into()).unwrap().name, "b.txt");
    }

    #[tokio::test]
    async fn update_of_unknown_id_has_no_old_value() {
        let (_data, mock, sync) = setup();
        mock.put_job(Job::new("j9", "fastqc"));

        let record = sync
            .apply_job(&RawEvent::job(Operation::Update, "j9"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.old_value.is_none());
        assert_eq!(record.new_value.unwrap().tool_id, "fastqc");
    }

    #[tokio::test]
    async fn delete_needs_no_fetch() {
        let (data, mock, sync) = setup();
        let _ = data.jobs().insert("j1".into(), Arc::new(Job::new("j1", "norm.R")));

        let record = sync
            .apply_job(&RawEvent::job(Operation::Delete, "j1"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(record.old_value.unwrap().tool_id, "norm.R");
        assert!(record.new_value.is_none());
        assert!(data.job(&"j1".into()).is_none());
        assert_eq!(mock.job_fetches(), 0);
    }

    #[tokio::test]
    async fn delete_of_unknown_id_is_empty_record() {
        let (_data, _mock, sync) = setup();
        let record = sync
            .apply_dataset(&RawEvent::dataset(Operation::Delete, "nope"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.old_value.is_none());
        assert!(record.new_value.is_none());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_cache_untouched() {
        let (data, mock, sync) = setup();
        let _ = data
            .datasets()
            .insert("d1".into(), Arc::new(Dataset::new("d1", "a.txt")));
        mock.fail_dataset(
            "d1",
            FetchError::Http {
                status: 500,
                status_text: "Internal Server Error".into(),
                body: String::new(),
            },
        );

        let err = sync
            .apply_dataset(&RawEvent::dataset(Operation::Update, "d1"))
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Fetch(FetchError::Http { status: 500, .. }));
        assert_eq!(data.dataset(&"d1".into()).unwrap().name, "a.txt");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let data = Arc::new(SessionData::new(Session::new(SessionId::from_raw("s1"), "demo")));
        let mock = Arc::new(MockSessionResource::new());
        mock.put_dataset(Dataset::new("d1", "a.txt"));
        let _gate = mock.gate_next_dataset_fetch();
        let sync = Synchronizer::new(Arc::clone(&data), mock, Some(Duration::from_millis(50)));

        let err = sync
            .apply_dataset(&RawEvent::dataset(Operation::Create, "d1"))
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Timeout(d) if d == Duration::from_millis(50));
        assert!(data.dataset(&"d1".into()).is_none());
    }

    #[tokio::test]
    async fn session_update_always_fetches_open_session() {
        let (data, mock, sync) = setup();
        let before = data.session();
        mock.set_session(Session::new(SessionId::from_raw("s1"), "renamed"));

        let record = sync
            .apply_session(&RawEvent::new(ResourceType::Session, Operation::Update, "other"))
            .await
            .unwrap()
            .unwrap();

        assert!(Arc::ptr_eq(record.old_value.as_ref().unwrap(), &before));
        assert_eq!(record.new_value.unwrap().name, "renamed");
        assert_eq!(data.session().name, "renamed");
        assert_eq!(mock.session_fetches(), 1);
    }

    #[tokio::test]
    async fn authorization_revocation_carries_session() {
        let (data, mock, sync) = setup();
        let record = sync
            .apply_authorization(&RawEvent::new(
                ResourceType::Authorization,
                Operation::Delete,
                "s1",
            ))
            .unwrap();
        assert!(Arc::ptr_eq(record.old_value.as_ref().unwrap(), &data.session()));
        assert!(record.new_value.is_none());
        assert_eq!(mock.session_fetches(), 0);
    }

    #[tokio::test]
    async fn unrecognized_combinations_are_logged_and_dropped() {
        let (logs, _guard) = capture_logs();
        let (data, mock, sync) = setup();
        let before = data.session();

        let session_create = RawEvent::new(ResourceType::Session, Operation::Create, "s1");
        assert!(sync.apply_session(&session_create).await.unwrap().is_none());
        let auth_update = RawEvent::new(ResourceType::Authorization, Operation::Update, "s1");
        assert!(sync.apply_authorization(&auth_update).is_none());

        assert!(Arc::ptr_eq(&before, &data.session()));
        assert_eq!(mock.session_fetches(), 0);
        assert_eq!(logs.count_at_level(Level::WARN), 2);
        assert!(logs.has_event(Level::WARN, "unrecognized event"));
    }
}
