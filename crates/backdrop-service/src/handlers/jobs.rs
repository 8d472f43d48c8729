//! Job submission and lookup handlers.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use backdrop_core::{Job, JobId, JobStatus};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::intake::{ImageUpload, JobSummary, SubmitJob};
use crate::state::AppState;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Submit a batch of images for background replacement.
///
/// Accepts `multipart/form-data` with one or more file fields and a text
/// field carrying the prompt (`prompt`, `backgroundPrompt` or
/// `background_prompt`).
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobSummary>), ApiError> {
    let mut images = Vec::new();
    let mut prompt = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if matches!(
            name.as_str(),
            "prompt" | "backgroundPrompt" | "background_prompt"
        ) {
            prompt = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Unreadable prompt: {e}")))?;
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            tracing::debug!(field = %name, "Ignoring non-file multipart field");
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        if content_type != DEFAULT_CONTENT_TYPE && !content_type.starts_with("image/") {
            return Err(ApiError::BadRequest(format!(
                "{file_name} is not an image ({content_type})"
            )));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Unreadable image {file_name}: {e}")))?;

        images.push(ImageUpload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let summary = state
        .intake
        .submit(SubmitJob {
            account_id: auth.account_id,
            images,
            background_prompt: prompt,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

/// Job response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    /// Job ID.
    pub id: String,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Number of images.
    pub image_count: u32,
    /// Credits held for the job.
    pub credits_reserved: i64,
    /// Credits actually consumed.
    pub credits_consumed: i64,
    /// Requested background.
    pub background_prompt: String,
    /// Stored image references.
    pub input_image_refs: Vec<String>,
    /// Progress percentage.
    pub progress: u8,
    /// Failure reason, for failed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            status: job.status,
            image_count: job.image_count,
            credits_reserved: job.credits_reserved,
            credits_consumed: job.credits_consumed,
            background_prompt: job.background_prompt,
            input_image_refs: job.input_image_refs,
            progress: job.progress,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Get one of the caller's jobs.
///
/// Jobs owned by other accounts are reported as not found.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let not_found = || ApiError::NotFound(format!("Job {job_id} not found"));

    let id = job_id.parse::<JobId>().map_err(|_| not_found())?;

    let job = state
        .store
        .get_job(&id)?
        .filter(|job| job.account_id == auth.account_id)
        .ok_or_else(not_found)?;

    Ok(Json(JobResponse::from(job)))
}
