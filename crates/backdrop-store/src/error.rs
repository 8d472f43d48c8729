//! Error types for backdrop storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record that was inserted.
        entity: &'static str,
        /// The identifier that already exists.
        id: String,
    },

    /// A write lost against concurrent writers too many times, or a job
    /// status change was not allowed.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Shorthand for a missing account.
    #[must_use]
    pub fn account_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing job.
    #[must_use]
    pub fn job_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "job",
            id: id.to_string(),
        }
    }
}
