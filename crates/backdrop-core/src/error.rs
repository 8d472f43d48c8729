//! Error types for backdrop domain validation.

use crate::ids::IdError;

/// Result type for backdrop core operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors raised while validating domain values.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// A credit amount was zero, negative or otherwise unusable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A pricing schedule violates the volume-discount contract.
    #[error("invalid pricing schedule: {0}")]
    InvalidPricing(String),

    /// A tier name did not match any known plan.
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    /// A job status change is not allowed by the job lifecycle.
    #[error("invalid job transition from {from} to {to}")]
    InvalidJobTransition {
        /// The current status.
        from: crate::JobStatus,
        /// The requested status.
        to: crate::JobStatus,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
