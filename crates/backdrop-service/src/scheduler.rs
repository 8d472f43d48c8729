//! Monthly credit reset batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use backdrop_core::AccountId;
use backdrop_store::{Store, StoreError};

use crate::ledger::{CreditLedger, ResetOutcome};

/// One account the batch could not reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetFailure {
    /// The account.
    pub account_id: String,
    /// What went wrong.
    pub error: String,
}

/// Aggregate result of a reset run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    /// Accounts selected for reset.
    pub total: usize,
    /// Accounts reset.
    pub successful: usize,
    /// Accounts whose reset failed.
    pub failed: usize,
    /// Accounts already reset for the period by a concurrent run.
    pub skipped: usize,
    /// Per-account failures.
    pub errors: Vec<ResetFailure>,
}

/// Finds accounts due for a reset and resets each independently.
#[derive(Clone)]
pub struct ResetScheduler {
    ledger: CreditLedger,
    store: Arc<dyn Store>,
    concurrency: usize,
}

impl ResetScheduler {
    /// Create a scheduler resetting up to `concurrency` accounts at once.
    #[must_use]
    pub fn new(ledger: CreditLedger, store: Arc<dyn Store>, concurrency: usize) -> Self {
        Self {
            ledger,
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Paid-tier accounts whose period has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if accounts cannot be listed.
    pub fn find_accounts_needing_reset(&self) -> Result<Vec<AccountId>, StoreError> {
        self.find_accounts_needing_reset_at(Utc::now())
    }

    /// [`find_accounts_needing_reset`](Self::find_accounts_needing_reset) evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if accounts cannot be listed.
    pub fn find_accounts_needing_reset_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccountId>, StoreError> {
        Ok(self
            .store
            .list_accounts()?
            .into_iter()
            .filter(|account| account.is_reset_due(now))
            .map(|account| account.id)
            .collect())
    }

    /// Reset every due account.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due accounts cannot be listed; failures
    /// of individual accounts are collected in the report.
    pub async fn run_reset(&self) -> Result<ResetReport, StoreError> {
        self.run_reset_at(Utc::now()).await
    }

    /// [`run_reset`](Self::run_reset) evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due accounts cannot be listed.
    pub async fn run_reset_at(&self, now: DateTime<Utc>) -> Result<ResetReport, StoreError> {
        let due = self.find_accounts_needing_reset_at(now)?;
        tracing::info!(accounts = due.len(), "Starting monthly credit reset");

        let results: Vec<_> = stream::iter(due.iter().copied())
            .map(|account_id| {
                let ledger = self.ledger.clone();
                async move {
                    let result = tokio::task::spawn_blocking(move || {
                        ledger.reset_monthly_at(&account_id, now)
                    })
                    .await;
                    (account_id, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = ResetReport {
            total: due.len(),
            ..ResetReport::default()
        };

        for (account_id, result) in results {
            let error = match result {
                Ok(Ok(ResetOutcome::Reset(_))) => {
                    report.successful += 1;
                    continue;
                }
                Ok(Ok(ResetOutcome::NotDue { .. })) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("reset task failed: {e}"),
            };

            tracing::error!(account_id = %account_id, error = %error, "Account reset failed");
            report.failed += 1;
            report.errors.push(ResetFailure {
                account_id: account_id.to_string(),
                error,
            });
        }

        tracing::info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            "Monthly credit reset finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backdrop_core::{Account, CreditTransaction, JobId, Tier};
    use backdrop_store::{MemoryStore, Mutation, MutationOutcome};
    use chrono::{Duration, TimeZone};

    fn seeded(store: &MemoryStore, tier: Tier, balance: i64, last: DateTime<Utc>) -> AccountId {
        let id = AccountId::generate();
        let mut account = Account::new(id, tier, last);
        account.credits_balance = balance;
        store.create_account(&account, None).unwrap();
        id
    }

    fn scheduler(store: Arc<dyn Store>) -> ResetScheduler {
        ResetScheduler::new(CreditLedger::new(store.clone()), store, 4)
    }

    fn march_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn selection_skips_free_and_recent_accounts() {
        let store = Arc::new(MemoryStore::new());
        let now = march_first();
        let due = seeded(&store, Tier::Starter, 10, now - Duration::days(40));
        seeded(&store, Tier::Free, 10, now - Duration::days(40));
        seeded(&store, Tier::Pro, 10, now - Duration::days(3));

        let found = scheduler(store).find_accounts_needing_reset_at(now).unwrap();
        assert_eq!(found, vec![due]);
    }

    #[tokio::test]
    async fn run_resets_every_due_account() {
        let store = Arc::new(MemoryStore::new());
        let now = march_first();
        let a = seeded(&store, Tier::Starter, 10, now - Duration::days(40));
        let b = seeded(&store, Tier::Starter, 80, now - Duration::days(35));

        let report = scheduler(store.clone()).run_reset_at(now).await.unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 0);
        assert!(report.errors.is_empty());
        assert_eq!(store.get_account(&a).unwrap().unwrap().credits_balance, 110);
        assert_eq!(store.get_account(&b).unwrap().unwrap().credits_balance, 150);
    }

    #[tokio::test]
    async fn second_run_in_same_period_does_nothing() {
        let store = Arc::new(MemoryStore::new());
        let now = march_first();
        let id = seeded(&store, Tier::Pro, 300, now - Duration::days(31));
        let scheduler = scheduler(store.clone());

        scheduler.run_reset_at(now).await.unwrap();
        let second = scheduler.run_reset_at(now + Duration::hours(1)).await.unwrap();

        assert_eq!(second.total, 0);
        assert_eq!(store.get_account(&id).unwrap().unwrap().credits_balance, 750);
    }

    /// Store that fails mutations for one account.
    struct FlakyStore {
        inner: MemoryStore,
        broken: AccountId,
    }

    impl Store for FlakyStore {
        fn create_account(
            &self,
            account: &Account,
            opening: Option<&CreditTransaction>,
        ) -> backdrop_store::Result<()> {
            self.inner.create_account(account, opening)
        }

        fn get_account(&self, account_id: &AccountId) -> backdrop_store::Result<Option<Account>> {
            self.inner.get_account(account_id)
        }

        fn list_accounts(&self) -> backdrop_store::Result<Vec<Account>> {
            self.inner.list_accounts()
        }

        fn mutate_account(
            &self,
            account_id: &AccountId,
            mutation: &mut dyn FnMut(&mut Account) -> Mutation,
        ) -> backdrop_store::Result<MutationOutcome> {
            if *account_id == self.broken {
                return Err(StoreError::Database("disk on fire".into()));
            }
            self.inner.mutate_account(account_id, mutation)
        }

        fn get_transaction(
            &self,
            transaction_id: &backdrop_core::TransactionId,
        ) -> backdrop_store::Result<Option<CreditTransaction>> {
            self.inner.get_transaction(transaction_id)
        }

        fn list_transactions_by_account(
            &self,
            account_id: &AccountId,
            limit: usize,
            offset: usize,
        ) -> backdrop_store::Result<Vec<CreditTransaction>> {
            self.inner
                .list_transactions_by_account(account_id, limit, offset)
        }

        fn insert_job(&self, job: &backdrop_core::Job) -> backdrop_store::Result<()> {
            self.inner.insert_job(job)
        }

        fn get_job(&self, job_id: &JobId) -> backdrop_store::Result<Option<backdrop_core::Job>> {
            self.inner.get_job(job_id)
        }

        fn transition_job(
            &self,
            job_id: &JobId,
            status: backdrop_core::JobStatus,
            error_message: Option<String>,
        ) -> backdrop_store::Result<backdrop_core::Job> {
            self.inner.transition_job(job_id, status, error_message)
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let inner = MemoryStore::new();
        let now = march_first();
        let healthy = seeded(&inner, Tier::Starter, 0, now - Duration::days(40));
        let broken = seeded(&inner, Tier::Studio, 0, now - Duration::days(40));
        let store = Arc::new(FlakyStore { inner, broken });

        let report = scheduler(store.clone()).run_reset_at(now).await.unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].account_id, broken.to_string());
        assert!(report.errors[0].error.contains("disk on fire"));
        assert_eq!(store.get_account(&healthy).unwrap().unwrap().credits_balance, 100);
    }
}
