//! External collaborators consumed by the job intake saga.
//!
//! - [`ObjectStorage`] stores uploaded images and hands back a reference.
//! - [`JobQueue`] accepts a job for the image-generation workers.
//!
//! HTTP implementations live in [`http`]; [`memory`] provides in-process
//! stand-ins used in tests and when no endpoint is configured outside
//! production.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use backdrop_core::{AccountId, JobId};

use crate::config::ServiceConfig;

pub mod http;
pub mod memory;

pub use http::{HttpJobQueue, HttpObjectStorage};
pub use memory::{MemoryJobQueue, MemoryObjectStorage};

/// Error type for collaborator calls.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The collaborator answered with a non-success status.
    #[error("collaborator returned {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The collaborator is not accepting work.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    /// A required collaborator endpoint is missing from the configuration.
    #[error("{0} must be set in production")]
    NotConfigured(&'static str),
}

/// Stores uploaded image bytes.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload one image and return its reference URL.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        mime_type: &str,
    ) -> Result<String, CollaboratorError>;
}

/// Payload handed to the processing queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    /// Job identifier.
    pub job_id: JobId,
    /// Owning account.
    pub account_id: AccountId,
    /// Requested background description.
    pub prompt: String,
    /// Storage references of the input images, in submission order.
    pub image_refs: Vec<String>,
}

/// Dispatches jobs to the image-generation workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. `Ok` means the queue has durably accepted it.
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), CollaboratorError>;
}

/// Build the collaborators named by the configuration.
///
/// Outside production, unconfigured collaborators fall back to the
/// in-memory implementations.
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be built, or if a collaborator
/// endpoint is missing in production.
pub fn from_config(
    config: &ServiceConfig,
) -> Result<(Arc<dyn ObjectStorage>, Arc<dyn JobQueue>), CollaboratorError> {
    if config.is_production() {
        if config.storage_base_url.is_none() {
            tracing::error!("STORAGE_BASE_URL not configured in production");
            return Err(CollaboratorError::NotConfigured("STORAGE_BASE_URL"));
        }
        if config.queue_url.is_none() {
            tracing::error!("QUEUE_URL not configured in production");
            return Err(CollaboratorError::NotConfigured("QUEUE_URL"));
        }
    }

    let storage: Arc<dyn ObjectStorage> = if let Some(url) = &config.storage_base_url {
        tracing::info!(storage_url = %url, "Object storage integration enabled");
        Arc::new(HttpObjectStorage::new(
            url,
            config.storage_api_key.clone(),
            config.intake.upload_timeout,
        )?)
    } else {
        tracing::warn!("Object storage not configured - images are kept in memory");
        Arc::new(MemoryObjectStorage::new())
    };

    let queue: Arc<dyn JobQueue> = if let Some(url) = &config.queue_url {
        tracing::info!(queue_url = %url, "Job queue integration enabled");
        Arc::new(HttpJobQueue::new(
            url,
            config.queue_api_key.clone(),
            config.intake.dispatch_timeout,
        )?)
    } else {
        tracing::warn!("Job queue not configured - jobs are queued in memory");
        Arc::new(MemoryJobQueue::new())
    };

    Ok((storage, queue))
}
