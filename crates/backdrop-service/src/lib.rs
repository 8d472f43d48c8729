//! Backdrop HTTP API Service.
//!
//! This crate holds the credit accounting core and its HTTP surface:
//!
//! - [`CreditLedger`] - atomic balance mutations (reserve, refund, purchase, reset)
//! - [`JobIntake`] - the submission saga tying reservation to job creation and dispatch
//! - [`ResetScheduler`] - the monthly reset batch
//! - Handlers for accounts, credits, jobs, the reset trigger and payment webhooks
//!
//! # Authentication
//!
//! 1. **Session JWTs** (HS256) - end-user requests; the subject is the account ID
//! 2. **Admin API key** - tier changes
//! 3. **Cron secret** - the reset trigger, required in production only
//! 4. **HMAC signatures** - payment webhooks

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Axum handlers must be async

pub mod auth;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod intake;
pub mod ledger;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use config::{IntakeConfig, ServiceConfig};
pub use error::ApiError;
pub use intake::JobIntake;
pub use ledger::CreditLedger;
pub use routes::create_router;
pub use scheduler::ResetScheduler;
pub use state::AppState;
