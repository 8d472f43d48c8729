//! Application state.

use std::sync::Arc;

use backdrop_core::{BillingError, PricingCalculator};
use backdrop_store::Store;

use crate::collaborators::{JobQueue, ObjectStorage};
use crate::config::ServiceConfig;
use crate::intake::JobIntake;
use crate::ledger::CreditLedger;
use crate::scheduler::ResetScheduler;

/// Application state shared across handlers.
///
/// Every service object is constructed here from the store handle and the
/// collaborators; nothing is process-global.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Balance mutations.
    pub ledger: CreditLedger,

    /// Job submission saga.
    pub intake: JobIntake,

    /// Monthly reset batch.
    pub scheduler: ResetScheduler,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPricing` if the configured pricing
    /// schedule is invalid.
    pub fn new(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobQueue>,
    ) -> Result<Self, BillingError> {
        let pricing = PricingCalculator::new(config.pricing.clone())?;
        let ledger = CreditLedger::new(Arc::clone(&store));
        let intake = JobIntake::new(
            ledger.clone(),
            Arc::clone(&store),
            pricing,
            storage,
            queue,
            config.intake.clone(),
        );
        let scheduler =
            ResetScheduler::new(ledger.clone(), Arc::clone(&store), config.reset_concurrency);

        if config.auth_jwt_secret.is_none() {
            tracing::warn!("AUTH_JWT_SECRET not configured - user endpoints will reject every token");
        }
        if config.payment_webhook_secret.is_none() {
            tracing::warn!("PAYMENT_WEBHOOK_SECRET not configured - payment webhooks are not verified");
        }
        if config.is_production() && config.cron_secret.is_none() {
            tracing::warn!("CRON_SECRET not configured - the reset trigger will reject every call");
        }

        Ok(Self {
            store,
            config,
            ledger,
            intake,
            scheduler,
        })
    }
}
