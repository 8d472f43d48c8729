//! Background-replacement job records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;
use crate::{AccountId, JobId};

/// Lifecycle state of a job.
///
/// ```text
/// pending ──► queued ──► processing ──► completed
///    │          │            │
///    └──────────┴────────────┴────────► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Credits reserved and record created; not yet dispatched.
    Pending,
    /// Accepted by the processing queue.
    Queued,
    /// Picked up by a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
}

impl JobStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Queued | Self::Failed)
                | (Self::Queued, Self::Processing | Self::Failed)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted batch of images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Owning account.
    pub account_id: AccountId,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Credits held at submission.
    pub credits_reserved: i64,
    /// Credits settled so far. Never exceeds `credits_reserved`.
    pub credits_consumed: i64,
    /// Number of input images.
    pub image_count: u32,
    /// Storage references of the input images, in submission order.
    pub input_image_refs: Vec<String>,
    /// Requested background description.
    pub background_prompt: String,
    /// Worker-reported progress, 0-100.
    pub progress: u8,
    /// Failure reason, set when the job fails.
    pub error_message: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly reserved job awaiting dispatch.
    #[must_use]
    pub fn pending(
        id: JobId,
        account_id: AccountId,
        credits_reserved: i64,
        input_image_refs: Vec<String>,
        background_prompt: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            account_id,
            status: JobStatus::Pending,
            credits_reserved,
            credits_consumed: 0,
            image_count: u32::try_from(input_image_refs.len()).unwrap_or(u32::MAX),
            input_image_refs,
            background_prompt,
            progress: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the job to `next`, recording `error_message` when it fails.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidJobTransition` if the lifecycle does not
    /// allow the change.
    pub fn transition(
        &mut self,
        next: JobStatus,
        error_message: Option<String>,
    ) -> Result<(), BillingError> {
        if !self.status.can_transition_to(next) {
            return Err(BillingError::InvalidJobTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == JobStatus::Failed {
            self.error_message = error_message;
        }
        if next == JobStatus::Completed {
            self.progress = 100;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
