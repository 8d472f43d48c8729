//! HTTP collaborator clients.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{CollaboratorError, JobQueue, ObjectStorage, QueuedJob};

/// Upload response from the object storage service.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

fn build_client(timeout: Duration) -> Result<Client, CollaboratorError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Turn a non-success response into [`CollaboratorError::Rejected`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .ok()
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));
    Err(CollaboratorError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Keep object names URL-safe.
fn object_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "image".into()
    } else {
        cleaned
    }
}

/// Object storage reached over HTTP.
///
/// `PUT {base_url}/objects/{uuid}/{name}` with the raw bytes; the service
/// answers `{"url": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpObjectStorage {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpObjectStorage {
    /// Create a storage client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
    ) -> Result<String, CollaboratorError> {
        let url = format!(
            "{}/objects/{}/{}",
            self.base_url,
            uuid::Uuid::new_v4(),
            object_name(name)
        );

        let mut request = self
            .client
            .put(&url)
            .header("Content-Type", mime_type)
            .body(bytes);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = check_status(request.send().await?).await?;
        let body: UploadResponse = response.json().await?;

        tracing::debug!(url = %body.url, "Image uploaded");
        Ok(body.url)
    }
}

/// Job queue reached over HTTP: `POST {queue_url}` with the job as JSON.
#[derive(Debug, Clone)]
pub struct HttpJobQueue {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpJobQueue {
    /// Create a queue client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl JobQueue for HttpJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), CollaboratorError> {
        let mut request = self.client.post(&self.url).json(job);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        check_status(request.send().await?).await?;

        tracing::debug!(job_id = %job.job_id, "Job dispatched to queue");
        Ok(())
    }
}
