//! Core types and utilities for backdrop.
//!
//! This crate provides the foundational types used by the credit accounting core:
//!
//! - **Identifiers**: `AccountId`, `TransactionId`, `JobId`
//! - **Accounts**: `Account`, `Tier`, `TierConfig`
//! - **Credits**: `CreditTransaction`, `TransactionKind`
//! - **Jobs**: `Job`, `JobStatus`
//! - **Pricing**: `PricingCalculator`, `PricingConfig`, `VolumeTier`
//! - **Calendar**: calendar-month arithmetic for reset periods
//!
//! # Credit Unit
//!
//! Credits are whole units stored as `i64`. One processed image costs a
//! tier-independent number of credits determined by the volume schedule in
//! [`PricingConfig`]. Balances never go below zero.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod calendar;
pub mod credits;
pub mod error;
pub mod ids;
pub mod job;
pub mod pricing;

pub use account::{Account, Tier, TierConfig};
pub use credits::{CreditTransaction, TransactionKind};
pub use error::{BillingError, Result};
pub use ids::{AccountId, IdError, JobId, TransactionId};
pub use job::{Job, JobStatus};
pub use pricing::{DiscountInfo, PricingCalculator, PricingConfig, VolumeTier};
