//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Multi-key writes run inside optimistic transactions: rows that decide the
//! outcome are read with `get_for_update`, so a concurrent commit touching the
//! same account (or idempotency key, or job) fails ours with `Busy` and the
//! whole read-modify-write is replayed against fresh data.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, Options, Transaction,
};

use backdrop_core::{
    Account, AccountId, CreditTransaction, Job, JobId, JobStatus, TransactionId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{run_mutation, Mutation, MutationOutcome, Store};

/// Commit attempts before a contended write gives up.
const MAX_COMMIT_ATTEMPTS: u32 = 32;

type Db = OptimisticTransactionDB<MultiThreaded>;

/// What a transaction body wants done with its transaction.
enum Step<T> {
    /// Commit the writes, then return the value.
    Commit(T),
    /// Discard the writes and return the value.
    Abort(T),
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors).map_err(db_error)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Run `body` in an optimistic transaction, replaying it on write conflicts.
    fn in_transaction<T>(
        &self,
        what: &str,
        mut body: impl FnMut(&Transaction<'_, Db>) -> Result<Step<T>>,
    ) -> Result<T> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let txn = self.db.transaction();
            match body(&txn)? {
                Step::Abort(value) => return Ok(value),
                Step::Commit(value) => match txn.commit() {
                    Ok(()) => return Ok(value),
                    Err(e) if matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain) => {
                        tracing::debug!(operation = what, attempt, "Write conflict, retrying");
                    }
                    Err(e) => return Err(db_error(e)),
                },
            }
        }

        tracing::warn!(operation = what, "Write conflict retries exhausted");
        Err(StoreError::Conflict(format!(
            "{what}: gave up after {MAX_COMMIT_ATTEMPTS} conflicting attempts"
        )))
    }

    /// Stage a transaction and its account index entry.
    fn stage_transaction(&self, txn: &Transaction<'_, Db>, tx: &CreditTransaction) -> Result<()> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;

        txn.put_cf(&cf_tx, keys::transaction_key(&tx.id), Self::serialize(tx)?)
            .map_err(db_error)?;
        txn.put_cf(
            &cf_by_account,
            keys::account_transaction_key(&tx.account_id, &tx.id),
            b"",
        )
        .map_err(db_error)?;

        if let Some(key) = &tx.idempotency_key {
            let cf_keys = self.cf(cf::IDEMPOTENCY_KEYS)?;
            txn.put_cf(&cf_keys, keys::idempotency_key(key), tx.id.to_bytes())
                .map_err(db_error)?;
        }
        Ok(())
    }
}

fn db_error(e: rocksdb::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn create_account(
        &self,
        account: &Account,
        opening: Option<&CreditTransaction>,
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(&account.id);
        let value = Self::serialize(account)?;

        self.in_transaction("create_account", |txn| {
            if txn
                .get_for_update_cf(&cf_accounts, &key, true)
                .map_err(db_error)?
                .is_some()
            {
                return Err(StoreError::AlreadyExists {
                    entity: "account",
                    id: account.id.to_string(),
                });
            }

            txn.put_cf(&cf_accounts, &key, &value).map_err(db_error)?;
            if let Some(tx) = opening {
                self.stage_transaction(txn, tx)?;
            }
            Ok(Step::Commit(()))
        })
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;

        self.db
            .get_cf(&cf, keys::account_key(account_id))
            .map_err(db_error)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;

        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|item| {
                let (_, value) = item.map_err(db_error)?;
                Self::deserialize(&value)
            })
            .collect()
    }

    fn mutate_account(
        &self,
        account_id: &AccountId,
        mutation: &mut dyn FnMut(&mut Account) -> Mutation,
    ) -> Result<MutationOutcome> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_keys = self.cf(cf::IDEMPOTENCY_KEYS)?;
        let key = keys::account_key(account_id);

        self.in_transaction("mutate_account", |txn| {
            let current: Account = txn
                .get_for_update_cf(&cf_accounts, &key, true)
                .map_err(db_error)?
                .map(|data| Self::deserialize(&data))
                .transpose()?
                .ok_or_else(|| StoreError::account_not_found(account_id))?;

            let (account, transactions) = run_mutation(&current, mutation);
            let Some(transactions) = transactions else {
                return Ok(Step::Abort(MutationOutcome::Skipped { account }));
            };

            for idempotency_key in transactions.iter().filter_map(|tx| tx.idempotency_key.as_ref()) {
                let seen = txn
                    .get_for_update_cf(&cf_keys, keys::idempotency_key(idempotency_key), true)
                    .map_err(db_error)?;
                if seen.is_some() {
                    return Ok(Step::Abort(MutationOutcome::Duplicate {
                        account: current,
                        idempotency_key: idempotency_key.clone(),
                    }));
                }
            }

            txn.put_cf(&cf_accounts, &key, Self::serialize(&account)?)
                .map_err(db_error)?;
            for tx in &transactions {
                self.stage_transaction(txn, tx)?;
            }

            Ok(Step::Commit(MutationOutcome::Applied {
                account,
                transactions,
            }))
        })
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<CreditTransaction>> {
        let cf = self.cf(cf::TRANSACTIONS)?;

        self.db
            .get_cf(&cf, keys::transaction_key(transaction_id))
            .map_err(db_error)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);

        // Collect the index keys in ULID (time) order, then walk them backwards
        let mut index_keys: Vec<Box<[u8]>> = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, _) = item.map_err(db_error)?;
            if !key.starts_with(&prefix) {
                break;
            }
            index_keys.push(key);
        }

        let mut transactions = Vec::new();
        for key in index_keys.iter().rev().skip(offset).take(limit) {
            let Some(tx_id) = keys::transaction_id_from_index_key(key) else {
                tracing::warn!(account_id = %account_id, "Malformed transaction index key");
                continue;
            };
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    fn insert_job(&self, job: &Job) -> Result<()> {
        let cf_jobs = self.cf(cf::JOBS)?;
        let key = keys::job_key(&job.id);
        let value = Self::serialize(job)?;

        self.in_transaction("insert_job", |txn| {
            if txn
                .get_for_update_cf(&cf_jobs, &key, true)
                .map_err(db_error)?
                .is_some()
            {
                return Err(StoreError::AlreadyExists {
                    entity: "job",
                    id: job.id.to_string(),
                });
            }
            txn.put_cf(&cf_jobs, &key, &value).map_err(db_error)?;
            Ok(Step::Commit(()))
        })
    }

    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        let cf = self.cf(cf::JOBS)?;

        self.db
            .get_cf(&cf, keys::job_key(job_id))
            .map_err(db_error)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn transition_job(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job> {
        let cf_jobs = self.cf(cf::JOBS)?;
        let key = keys::job_key(job_id);

        self.in_transaction("transition_job", |txn| {
            let mut job: Job = txn
                .get_for_update_cf(&cf_jobs, &key, true)
                .map_err(db_error)?
                .map(|data| Self::deserialize(&data))
                .transpose()?
                .ok_or_else(|| StoreError::job_not_found(job_id))?;

            job.transition(status, error_message.clone())
                .map_err(|e| StoreError::Conflict(e.to_string()))?;

            txn.put_cf(&cf_jobs, &key, Self::serialize(&job)?)
                .map_err(db_error)?;
            Ok(Step::Commit(job))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backdrop_core::Tier;
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn funded_account(store: &RocksStore, balance: i64) -> AccountId {
        let id = AccountId::generate();
        let mut account = Account::new(id, Tier::Pro, Utc::now());
        account.credits_balance = balance;
        store.create_account(&account, None).unwrap();
        id
    }

    fn debit(amount: i64) -> impl FnMut(&mut Account) -> Mutation {
        move |account: &mut Account| {
            if account.credits_balance < amount {
                return Mutation::Skip;
            }
            account.credits_balance -= amount;
            Mutation::Apply(vec![CreditTransaction::usage(
                account.id,
                amount,
                account.credits_balance,
                JobId::generate(),
                "test debit".into(),
            )])
        }
    }

    #[test]
    fn account_roundtrip_and_listing() {
        let (store, _dir) = create_test_store();
        let id = funded_account(&store, 300);

        let account = store.get_account(&id).unwrap().unwrap();
        assert_eq!(account.credits_balance, 300);
        assert_eq!(account.tier, Tier::Pro);
        assert_eq!(store.list_accounts().unwrap().len(), 1);
        assert!(store.get_account(&AccountId::generate()).unwrap().is_none());
    }

    #[test]
    fn opening_transaction_is_written_with_account() {
        let (store, _dir) = create_test_store();
        let id = AccountId::generate();
        let mut account = Account::new(id, Tier::Starter, Utc::now());
        account.credits_balance = 100;
        let opening = CreditTransaction::monthly_grant(id, 100, 100, Tier::Starter);

        store.create_account(&account, Some(&opening)).unwrap();

        let txs = store.list_transactions_by_account(&id, 10, 0).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, opening.id);
        assert!(matches!(
            store.create_account(&account, None),
            Err(StoreError::AlreadyExists { entity: "account", .. })
        ));
    }

    #[test]
    fn mutation_commits_account_and_transactions() {
        let (store, _dir) = create_test_store();
        let id = funded_account(&store, 100);

        let outcome = store.mutate_account(&id, &mut debit(30)).unwrap();
        let MutationOutcome::Applied { account, transactions } = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(account.credits_balance, 70);
        assert_eq!(transactions.len(), 1);

        let stored = store.get_account(&id).unwrap().unwrap();
        assert_eq!(stored.credits_balance, 70);
        let listed = store.list_transactions_by_account(&id, 10, 0).unwrap();
        assert_eq!(listed, transactions);
    }

    #[test]
    fn refund_key_applies_once() {
        let (store, _dir) = create_test_store();
        let id = funded_account(&store, 0);
        let job_id = JobId::generate();
        let mut refund = |account: &mut Account| {
            account.credits_balance += 25;
            Mutation::Apply(vec![CreditTransaction::refund(
                account.id,
                25,
                account.credits_balance,
                job_id,
                "dispatch failed".into(),
            )])
        };

        assert!(matches!(
            store.mutate_account(&id, &mut refund).unwrap(),
            MutationOutcome::Applied { .. }
        ));
        assert!(matches!(
            store.mutate_account(&id, &mut refund).unwrap(),
            MutationOutcome::Duplicate { .. }
        ));
        assert_eq!(store.get_account(&id).unwrap().unwrap().credits_balance, 25);
        assert_eq!(store.transactions_for_job(&id, &job_id).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);
        let id = funded_account(&store, 100);

        let applied: i64 = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    scope.spawn(move || {
                        let mut total = 0;
                        for _ in 0..5 {
                            if let MutationOutcome::Applied { .. } =
                                store.mutate_account(&id, &mut debit(7)).unwrap()
                            {
                                total += 7;
                            }
                        }
                        total
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        let account = store.get_account(&id).unwrap().unwrap();
        assert!(applied <= 100);
        assert_eq!(account.credits_balance, 100 - applied);
        let recorded: i64 = store
            .list_transactions_by_account(&id, usize::MAX, 0)
            .unwrap()
            .iter()
            .map(|tx| tx.amount)
            .sum();
        assert_eq!(recorded, -applied);
    }

    #[test]
    fn job_insert_and_transition() {
        let (store, _dir) = create_test_store();
        let job = Job::pending(
            JobId::generate(),
            AccountId::generate(),
            8,
            vec!["r1".into(), "r2".into()],
            "studio backdrop".into(),
        );
        store.insert_job(&job).unwrap();
        assert!(matches!(
            store.insert_job(&job),
            Err(StoreError::AlreadyExists { entity: "job", .. })
        ));

        let failed = store
            .transition_job(&job.id, JobStatus::Failed, Some("queue unavailable".into()))
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            store.get_job(&job.id).unwrap().unwrap().error_message.as_deref(),
            Some("queue unavailable")
        );
        assert!(matches!(
            store.transition_job(&job.id, JobStatus::Queued, None),
            Err(StoreError::Conflict(_))
        ));
    }
}
