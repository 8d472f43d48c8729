//! In-memory storage implementation.
//!
//! A single mutex serializes every operation, which trivially satisfies the
//! per-account linearizability contract of [`Store::mutate_account`]. Data
//! lives only as long as the value.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use backdrop_core::{
    Account, AccountId, CreditTransaction, Job, JobId, JobStatus, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::{run_mutation, Mutation, MutationOutcome, Store};

#[derive(Default)]
struct Inner {
    accounts: BTreeMap<AccountId, Account>,
    transactions: HashMap<TransactionId, CreditTransaction>,
    /// Transaction ids per account in commit order.
    by_account: HashMap<AccountId, Vec<TransactionId>>,
    idempotency_keys: HashMap<String, TransactionId>,
    jobs: HashMap<JobId, Job>,
}

impl Inner {
    fn append(&mut self, tx: CreditTransaction) {
        if let Some(key) = &tx.idempotency_key {
            self.idempotency_keys.insert(key.clone(), tx.id);
        }
        self.by_account.entry(tx.account_id).or_default().push(tx.id);
        self.transactions.insert(tx.id, tx);
    }
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn create_account(
        &self,
        account: &Account,
        opening: Option<&CreditTransaction>,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.id.to_string(),
            });
        }
        inner.accounts.insert(account.id, account.clone());
        if let Some(tx) = opening {
            inner.append(tx.clone());
        }
        Ok(())
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(account_id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.lock()?.accounts.values().cloned().collect())
    }

    fn mutate_account(
        &self,
        account_id: &AccountId,
        mutation: &mut dyn FnMut(&mut Account) -> Mutation,
    ) -> Result<MutationOutcome> {
        let mut inner = self.lock()?;
        let current = inner
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::account_not_found(account_id))?;

        let (account, transactions) = run_mutation(&current, mutation);
        let Some(transactions) = transactions else {
            return Ok(MutationOutcome::Skipped { account });
        };

        let duplicate = transactions
            .iter()
            .filter_map(|tx| tx.idempotency_key.as_ref())
            .find(|key| inner.idempotency_keys.contains_key(*key));
        if let Some(key) = duplicate {
            return Ok(MutationOutcome::Duplicate {
                account: current,
                idempotency_key: key.clone(),
            });
        }

        inner.accounts.insert(*account_id, account.clone());
        for tx in &transactions {
            inner.append(tx.clone());
        }

        Ok(MutationOutcome::Applied {
            account,
            transactions,
        })
    }

    fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CreditTransaction>> {
        Ok(self.lock()?.transactions.get(transaction_id).cloned())
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.lock()?;
        let Some(ids) = inner.by_account.get(account_id) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.transactions.get(id).cloned())
            .collect())
    }

    fn insert_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists {
                entity: "job",
                id: job.id.to_string(),
            });
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(job_id).cloned())
    }

    fn transition_job(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job> {
        let mut inner = self.lock()?;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::job_not_found(job_id))?;
        job.transition(status, error_message)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        Ok(job.clone())
    }
}
