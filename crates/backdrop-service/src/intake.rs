//! Job submission.
//!
//! [`JobIntake::submit`] runs the submission saga:
//!
//! 1. validate the batch
//! 2. load the account
//! 3. price the batch and pre-check the balance
//! 4. upload every image
//! 5. reserve credits (authoritative balance check)
//! 6. record the job as `pending`
//! 7. dispatch to the queue and mark it `queued`
//!
//! Steps 1-5 have no billable side effect when they fail. From step 6 on,
//! any failure refunds the reservation before the call returns, and a
//! dispatch failure also marks the job `failed`. The refund is retried a
//! few times; a job whose refund never lands stays `pending` so that
//! reconciliation can find it with its credits still held.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::Serialize;

use backdrop_core::{AccountId, Job, JobId, JobStatus, PricingCalculator};
use backdrop_store::Store;

use crate::collaborators::{JobQueue, ObjectStorage, QueuedJob};
use crate::config::IntakeConfig;
use crate::ledger::{CreditLedger, LedgerError, RefundOutcome, ReserveOutcome};

/// Attempts at a compensating refund before giving up.
const MAX_REFUND_ATTEMPTS: u32 = 3;

/// Delay before the first refund retry; doubled on each further attempt.
const REFUND_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Submission failure, by saga step.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// The batch is malformed. Nothing happened.
    #[error("{0}")]
    Validation(String),

    /// The account does not exist. Nothing happened.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// The balance does not cover the batch. Nothing was reserved.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Price of the batch.
        required: i64,
        /// Balance seen by the check that failed.
        available: i64,
    },

    /// An image could not be stored. Nothing was reserved.
    #[error("image upload failed: {0}")]
    Upload(String),

    /// The queue did not accept the job. The reservation was refunded and
    /// the job marked failed, or, if the refund could not be applied, the
    /// job was left pending for reconciliation.
    #[error("job dispatch failed: {reason}")]
    Dispatch {
        /// The failed job.
        job_id: JobId,
        /// Why dispatch failed.
        reason: String,
    },

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for IntakeError {
    fn from(err: LedgerError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<backdrop_store::StoreError> for IntakeError {
    fn from(err: backdrop_store::StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// One image of a batch.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    /// Client-supplied file name.
    pub file_name: String,
    /// MIME type.
    pub content_type: String,
    /// Image bytes.
    pub bytes: Vec<u8>,
}

/// A batch submission.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    /// Submitting account.
    pub account_id: AccountId,
    /// Images in submission order.
    pub images: Vec<ImageUpload>,
    /// Requested background description.
    pub background_prompt: String,
}

/// What the caller learns about an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Job identifier.
    pub id: JobId,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Number of images.
    pub image_count: u32,
    /// Credits held for the job.
    pub credits_reserved: i64,
}

/// Orchestrates job submission.
pub struct JobIntake {
    ledger: CreditLedger,
    store: Arc<dyn Store>,
    pricing: PricingCalculator,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn JobQueue>,
    config: IntakeConfig,
}

impl JobIntake {
    /// Wire the saga to its collaborators.
    #[must_use]
    pub fn new(
        ledger: CreditLedger,
        store: Arc<dyn Store>,
        pricing: PricingCalculator,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobQueue>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            pricing,
            storage,
            queue,
            config,
        }
    }

    /// Submit a batch.
    ///
    /// # Errors
    ///
    /// See [`IntakeError`]; each variant documents what was left behind.
    pub async fn submit(&self, request: SubmitJob) -> Result<JobSummary, IntakeError> {
        let SubmitJob {
            account_id,
            images,
            background_prompt,
        } = request;

        // 1. Validate
        let quantity = self.validate(&images, &background_prompt)?;
        let prompt = background_prompt.trim().to_string();

        // 2. Load account
        let account = self
            .store
            .get_account(&account_id)?
            .ok_or(IntakeError::AccountNotFound(account_id))?;

        // 3. Price and pre-check
        let required = self.pricing.compute_cost(quantity);
        if !PricingCalculator::has_enough_credits(account.credits_balance, required) {
            return Err(IntakeError::InsufficientCredits {
                required,
                available: account.credits_balance,
            });
        }

        // 4. Upload
        let image_refs = self.upload_all(images).await?;

        // 5. Reserve
        let job_id = JobId::generate();
        let description = self.describe(quantity);
        match self.ledger.reserve(&account_id, required, job_id, &description)? {
            ReserveOutcome::Reserved { .. } => {}
            ReserveOutcome::Insufficient { available } => {
                return Err(IntakeError::InsufficientCredits {
                    required,
                    available,
                });
            }
        }

        // 6. Record
        let job = Job::pending(job_id, account_id, required, image_refs, prompt);
        if let Err(e) = self.store.insert_job(&job) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job");
            self.refund_reservation(&job, "job could not be recorded")
                .await;
            return Err(e.into());
        }

        // 7. Dispatch
        let queued = QueuedJob {
            job_id,
            account_id,
            prompt: job.background_prompt.clone(),
            image_refs: job.input_image_refs.clone(),
        };
        let dispatched =
            match tokio::time::timeout(self.config.dispatch_timeout, self.queue.enqueue(&queued))
                .await
            {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!(
                    "queue did not respond within {}s",
                    self.config.dispatch_timeout.as_secs_f64()
                )),
            };

        if let Err(reason) = dispatched {
            tracing::warn!(
                job_id = %job_id,
                account_id = %account_id,
                reason = %reason,
                "Dispatch failed, compensating"
            );
            self.compensate(&job, &reason).await;
            return Err(IntakeError::Dispatch { job_id, reason });
        }

        let job = self
            .store
            .transition_job(&job_id, JobStatus::Queued, None)
            .map_err(|e| {
                tracing::error!(job_id = %job_id, error = %e, "Dispatched job could not be marked queued");
                IntakeError::from(e)
            })?;

        tracing::info!(
            job_id = %job_id,
            account_id = %account_id,
            image_count = job.image_count,
            credits_reserved = job.credits_reserved,
            "Job queued"
        );

        Ok(JobSummary {
            id: job.id,
            status: job.status,
            image_count: job.image_count,
            credits_reserved: job.credits_reserved,
        })
    }

    fn validate(&self, images: &[ImageUpload], prompt: &str) -> Result<u32, IntakeError> {
        if images.is_empty() {
            return Err(IntakeError::Validation(
                "at least one image is required".into(),
            ));
        }
        if images.len() > self.config.max_batch_size {
            return Err(IntakeError::Validation(format!(
                "at most {} images per batch",
                self.config.max_batch_size
            )));
        }
        if prompt.trim().is_empty() {
            return Err(IntakeError::Validation(
                "background prompt must not be empty".into(),
            ));
        }
        if let Some(image) = images.iter().find(|image| image.bytes.is_empty()) {
            return Err(IntakeError::Validation(format!(
                "image {} is empty",
                image.file_name
            )));
        }

        u32::try_from(images.len())
            .map_err(|_| IntakeError::Validation("batch too large".into()))
    }

    /// Upload every image, preserving order. Any failure fails the batch.
    async fn upload_all(&self, images: Vec<ImageUpload>) -> Result<Vec<String>, IntakeError> {
        let timeout = self.config.upload_timeout;

        let uploads = images.into_iter().map(|image| async move {
            let name = image.file_name.clone();
            let upload = self
                .storage
                .upload(image.bytes, &image.file_name, &image.content_type);

            match tokio::time::timeout(timeout, upload).await {
                Ok(Ok(reference)) => Ok(reference),
                Ok(Err(e)) => Err(IntakeError::Upload(format!("{name}: {e}"))),
                Err(_) => Err(IntakeError::Upload(format!(
                    "{name}: timed out after {}s",
                    timeout.as_secs_f64()
                ))),
            }
        });

        try_join_all(uploads).await.map_err(|e| {
            tracing::warn!(error = %e, "Upload failed, nothing reserved");
            e
        })
    }

    fn describe(&self, quantity: u32) -> String {
        match self.pricing.get_discount_info(quantity) {
            Some(discount) => format!(
                "Background replacement: {quantity} images ({:.0}% volume discount)",
                discount.discount_fraction * 100.0
            ),
            None if quantity == 1 => "Background replacement: 1 image".to_string(),
            None => format!("Background replacement: {quantity} images"),
        }
    }

    /// Undo a reservation whose job never reached the queue.
    ///
    /// The job is only marked failed once its credits are back; otherwise it
    /// stays pending with the reservation held.
    async fn compensate(&self, job: &Job, reason: &str) {
        if !self.refund_reservation(job, reason).await {
            tracing::error!(
                job_id = %job.id,
                account_id = %job.account_id,
                amount = job.credits_reserved,
                "Job left pending for reconciliation"
            );
            return;
        }

        if let Err(e) =
            self.store
                .transition_job(&job.id, JobStatus::Failed, Some(reason.to_string()))
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to mark job failed");
        }
    }

    /// Refund a reservation, retrying storage failures.
    ///
    /// Returns `true` once the refund is applied (now or earlier).
    async fn refund_reservation(&self, job: &Job, reason: &str) -> bool {
        let reason = format!("Refund: {reason}");
        let mut delay = REFUND_RETRY_DELAY;

        for attempt in 1..=MAX_REFUND_ATTEMPTS {
            match self
                .ledger
                .refund(&job.account_id, job.credits_reserved, job.id, &reason)
            {
                Ok(RefundOutcome::Refunded { new_balance }) => {
                    tracing::info!(job_id = %job.id, new_balance, "Reservation refunded");
                    return true;
                }
                Ok(RefundOutcome::AlreadyRefunded { .. }) => {
                    tracing::debug!(job_id = %job.id, "Reservation was already refunded");
                    return true;
                }
                Err(LedgerError::Store(e)) if attempt < MAX_REFUND_ATTEMPTS => {
                    // The refund key makes the retry safe
                    tracing::warn!(
                        job_id = %job.id,
                        attempt,
                        error = %e,
                        "Compensating refund failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job.id,
                        account_id = %job.account_id,
                        amount = job.credits_reserved,
                        attempt,
                        error = %e,
                        "Compensating refund failed"
                    );
                    return false;
                }
            }
        }

        false
    }
}
