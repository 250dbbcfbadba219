//! Session REST API client.
//!
//! Endpoints, relative to the REST base URL:
//!
//! | Call | Path |
//! |---|---|
//! | session | `GET sessions/{sessionId}` |
//! | datasets | `GET sessions/{sessionId}/datasets[/{datasetId}]` |
//! | jobs | `GET sessions/{sessionId}/jobs[/{jobId}]` |
//! | type tags | `GET {typeService}/typetags/{sessionId}/datasets/{datasetId}` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use sessync_core::type_tags::derive_type_tags;
use sessync_core::{
    Dataset, DatasetId, FetchError, Job, JobId, Session, SessionId, SessionResource, TypeTags,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors building the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A base URL could not be used.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The HTTP client could not be constructed.
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// [`SessionResource`] backed by the session REST API.
#[derive(Debug)]
pub struct HttpSessionResource {
    client: Client,
    rest_url: Url,
    type_service_url: Option<Url>,
    token: SecretString,
}

impl HttpSessionResource {
    /// Create a client for the given REST base URL.
    pub fn new(rest_url: &str, token: SecretString) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            rest_url: parse_base(rest_url)?,
            type_service_url: None,
            token,
        })
    }

    /// Fetch type tags from a type service instead of deriving them locally.
    pub fn with_type_service(mut self, url: &str) -> Result<Self, ClientError> {
        self.type_service_url = Some(parse_base(url)?);
        Ok(self)
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ClientError> {
        self.client = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn session_url(&self, session_id: &SessionId, rest: &[&str]) -> Url {
        let mut segments = vec!["sessions", session_id.as_str()];
        segments.extend_from_slice(rest);
        endpoint(&self.rest_url, &segments)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                debug!(%url, error = %e, "request failed");
                FetchError::Connection {
                    url: url.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_owned(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SessionResource for HttpSessionResource {
    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn get_session(&self, session_id: &SessionId) -> Result<Session, FetchError> {
        self.get_json(self.session_url(session_id, &[])).await
    }

    #[instrument(skip_all, fields(session_id = %session_id, dataset_id = %dataset_id))]
    async fn get_dataset(
        &self,
        session_id: &SessionId,
        dataset_id: &DatasetId,
    ) -> Result<Dataset, FetchError> {
        self.get_json(self.session_url(session_id, &["datasets", dataset_id.as_str()]))
            .await
    }

    async fn get_datasets(&self, session_id: &SessionId) -> Result<Vec<Dataset>, FetchError> {
        self.get_json(self.session_url(session_id, &["datasets"])).await
    }

    #[instrument(skip_all, fields(session_id = %session_id, job_id = %job_id))]
    async fn get_job(&self, session_id: &SessionId, job_id: &JobId) -> Result<Job, FetchError> {
        self.get_json(self.session_url(session_id, &["jobs", job_id.as_str()]))
            .await
    }

    async fn get_jobs(&self, session_id: &SessionId) -> Result<Vec<Job>, FetchError> {
        self.get_json(self.session_url(session_id, &["jobs"])).await
    }

    async fn get_type_tags(
        &self,
        session_id: &SessionId,
        dataset: &Dataset,
    ) -> Result<TypeTags, FetchError> {
        match &self.type_service_url {
            Some(base) => {
                let url = endpoint(
                    base,
                    &[
                        "typetags",
                        session_id.as_str(),
                        "datasets",
                        dataset.dataset_id.as_str(),
                    ],
                );
                self.get_json(url).await
            }
            None => Ok(derive_type_tags(dataset)),
        }
    }
}

fn parse_base(raw: &str) -> Result<Url, ClientError> {
    let url = Url::parse(raw).map_err(|e| ClientError::InvalidUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidUrl {
            url: raw.to_owned(),
            reason: "not a base url".into(),
        });
    }
    Ok(url)
}

/// Append path segments (percent-encoded) to a base URL.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        let _ = path.pop_if_empty().extend(segments);
    }
    url
}
