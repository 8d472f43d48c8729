//! Storage layer for backdrop.
//!
//! This crate persists accounts, credit transactions and jobs, and provides
//! the single primitive every balance change goes through:
//! [`Store::mutate_account`], an atomic read-modify-write of one account that
//! appends the transactions explaining the change in the same commit.
//!
//! # Backends
//!
//! - [`RocksStore`] (feature `rocksdb-backend`): `RocksDB` optimistic
//!   transactions with column families for indexing. Conflicting writers to
//!   the same account are detected at commit and retried.
//! - [`MemoryStore`]: a mutex-guarded map, for tests and local development.
//!
//! # Column families (`RocksDB`)
//!
//! - `accounts`: account records, keyed by `account_id`
//! - `transactions`: credit transactions, keyed by `transaction_id` (ULID)
//! - `transactions_by_account`: index for listing an account's transactions
//! - `idempotency_keys`: applied deduplication keys
//! - `jobs`: job records, keyed by `job_id` (ULID)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use backdrop_core::{
    Account, AccountId, CreditTransaction, Job, JobId, JobStatus, TransactionId,
};

/// What a mutation closure decided to do with the account it was handed.
#[derive(Debug)]
pub enum Mutation {
    /// Persist the modified account together with these transactions.
    Apply(Vec<CreditTransaction>),
    /// Leave the account untouched.
    Skip,
}

/// Result of [`Store::mutate_account`].
#[derive(Debug)]
pub enum MutationOutcome {
    /// The account and transactions were committed.
    Applied {
        /// Account state after the commit.
        account: Account,
        /// The transactions that were appended.
        transactions: Vec<CreditTransaction>,
    },
    /// The closure returned [`Mutation::Skip`]; nothing was written.
    Skipped {
        /// Account state the closure saw.
        account: Account,
    },
    /// A transaction carried an idempotency key that was already applied;
    /// nothing was written.
    Duplicate {
        /// Current account state.
        account: Account,
        /// The key that was already applied.
        idempotency_key: String,
    },
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account, optionally with its opening transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the account exists.
    fn create_account(&self, account: &Account, opening: Option<&CreditTransaction>)
        -> Result<()>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// List every account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Atomically read, modify and write one account.
    ///
    /// `mutation` receives the current account and may change it in place.
    /// It is linearizable with every other mutation of the same account and
    /// may be invoked more than once if a concurrent writer wins, so it must
    /// derive everything from the account it is handed. Transactions with an
    /// idempotency key that was already applied turn the call into a no-op
    /// reported as [`MutationOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::Conflict` if contention outlasted the retry budget.
    fn mutate_account(
        &self,
        account_id: &AccountId,
        mutation: &mut dyn FnMut(&mut Account) -> Mutation,
    ) -> Result<MutationOutcome>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId)
        -> Result<Option<CreditTransaction>>;

    /// List an account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    /// All of an account's transactions tagged with `job_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn transactions_for_job(
        &self,
        account_id: &AccountId,
        job_id: &JobId,
    ) -> Result<Vec<CreditTransaction>> {
        Ok(self
            .list_transactions_by_account(account_id, usize::MAX, 0)?
            .into_iter()
            .filter(|tx| tx.job_id.as_ref() == Some(job_id))
            .collect())
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Insert a new job record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the job exists.
    fn insert_job(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// Atomically move a job to `status`, returning the updated record.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the job doesn't exist.
    /// - `StoreError::Conflict` if the lifecycle forbids the change.
    fn transition_job(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job>;
}

/// Run a mutation closure against an account copy and classify the result.
///
/// Shared by the backends: returns the candidate account and the
/// transactions to write, or `None` when the closure skipped.
pub(crate) fn run_mutation(
    current: &Account,
    mutation: &mut dyn FnMut(&mut Account) -> Mutation,
) -> (Account, Option<Vec<CreditTransaction>>) {
    let mut candidate = current.clone();
    match mutation(&mut candidate) {
        Mutation::Apply(transactions) => {
            candidate.updated_at = chrono::Utc::now();
            (candidate, Some(transactions))
        }
        Mutation::Skip => (current.clone(), None),
    }
}
