//! The credit ledger.
//!
//! Every balance change goes through [`Store::mutate_account`], so each
//! operation below is a single atomic read-modify-write of one account that
//! also appends the transactions explaining the change. The balance check in
//! [`CreditLedger::reserve`] happens inside that step and is the
//! authoritative spend check.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use backdrop_core::{
    calendar, Account, AccountId, CreditTransaction, JobId, Tier, TransactionId,
};
use backdrop_store::{Mutation, MutationOutcome, Store, StoreError};

/// Ledger error type.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Amount must be positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The account does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(String),

    /// The account already exists.
    #[error("account already exists: {0}")]
    AccountExists(String),

    /// Storage failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "account",
                id,
            } => Self::AccountNotFound(id),
            StoreError::AlreadyExists {
                entity: "account",
                id,
            } => Self::AccountExists(id),
            other => Self::Store(other),
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result of [`CreditLedger::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Credits were held.
    Reserved {
        /// Balance after the hold.
        new_balance: i64,
        /// The usage transaction.
        transaction_id: TransactionId,
    },
    /// The balance did not cover the amount; nothing changed.
    Insufficient {
        /// Balance at the time of the check.
        available: i64,
    },
}

/// Result of [`CreditLedger::refund`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// Credits were returned.
    Refunded {
        /// Balance after the refund.
        new_balance: i64,
    },
    /// This job was already refunded; nothing changed.
    AlreadyRefunded {
        /// Current balance.
        balance: i64,
    },
}

/// Result of [`CreditLedger::add_purchase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// Credits were added.
    Credited {
        /// Balance after the purchase.
        new_balance: i64,
    },
    /// This payment reference was already applied; nothing changed.
    Duplicate {
        /// Current balance.
        balance: i64,
    },
}

/// Balances before and after a monthly reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetSummary {
    /// Balance before the reset.
    pub previous_balance: i64,
    /// Balance after the reset.
    pub new_balance: i64,
    /// Unused credits carried over.
    pub rolled_over_amount: i64,
    /// Allocation granted.
    pub monthly_credits: i64,
}

/// Result of [`CreditLedger::reset_monthly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The account was reset.
    Reset(ResetSummary),
    /// The current period has not ended; nothing changed.
    NotDue {
        /// When the account becomes eligible.
        next_reset: DateTime<Utc>,
    },
}

/// Read-only view of an account's credit position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditSummary {
    /// Account identifier.
    pub account_id: AccountId,
    /// Subscription tier.
    pub tier: Tier,
    /// Spendable credits.
    pub balance: i64,
    /// Credits granted per reset.
    pub monthly_allocation: i64,
    /// Credits reserved this period, net of refunds.
    pub used_this_month: i64,
    /// Maximum credits carried into the next period.
    pub rollover_cap: i64,
    /// Last reset.
    pub last_reset: DateTime<Utc>,
    /// Next scheduled reset.
    pub next_reset: DateTime<Utc>,
}

impl From<&Account> for CreditSummary {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id,
            tier: account.tier,
            balance: account.credits_balance,
            monthly_allocation: account.monthly_credits,
            used_this_month: account.credits_used_this_month,
            rollover_cap: account.rollover_cap,
            last_reset: account.last_credit_reset,
            next_reset: account.next_reset(),
        }
    }
}

/// Owns every balance mutation.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    /// Create a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create an account on `tier`, granting the tier's allocation.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountExists` if the account exists.
    pub fn open_account(&self, account_id: AccountId, tier: Tier) -> LedgerResult<Account> {
        let mut account = Account::new(account_id, tier, Utc::now());
        account.credits_balance = account.monthly_credits;
        let opening = CreditTransaction::monthly_grant(
            account_id,
            account.monthly_credits,
            account.credits_balance,
            tier,
        );

        self.store.create_account(&account, Some(&opening))?;

        tracing::info!(
            account_id = %account_id,
            tier = %tier,
            balance = account.credits_balance,
            "Account opened"
        );
        Ok(account)
    }

    /// Hold `amount` credits for `job_id` if the balance covers it.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount` is not positive.
    /// - `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn reserve(
        &self,
        account_id: &AccountId,
        amount: i64,
        job_id: JobId,
        description: &str,
    ) -> LedgerResult<ReserveOutcome> {
        require_positive(amount)?;

        let outcome = self.store.mutate_account(account_id, &mut |account| {
            if !account.has_sufficient_credits(amount) {
                return Mutation::Skip;
            }
            account.credits_balance -= amount;
            account.credits_used_this_month = account.credits_used_this_month.saturating_add(amount);
            Mutation::Apply(vec![CreditTransaction::usage(
                account.id,
                amount,
                account.credits_balance,
                job_id,
                description.to_string(),
            )])
        })?;

        match outcome {
            MutationOutcome::Applied {
                account,
                transactions,
            } => {
                tracing::info!(
                    account_id = %account_id,
                    job_id = %job_id,
                    amount,
                    new_balance = account.credits_balance,
                    "Credits reserved"
                );
                Ok(ReserveOutcome::Reserved {
                    new_balance: account.credits_balance,
                    transaction_id: first_id(&transactions)?,
                })
            }
            MutationOutcome::Skipped { account } => {
                tracing::info!(
                    account_id = %account_id,
                    job_id = %job_id,
                    amount,
                    available = account.credits_balance,
                    "Reservation declined"
                );
                Ok(ReserveOutcome::Insufficient {
                    available: account.credits_balance,
                })
            }
            MutationOutcome::Duplicate {
                idempotency_key, ..
            } => Err(unexpected_duplicate(&idempotency_key)),
        }
    }

    /// Return `amount` credits held for `job_id`. Applied at most once per job.
    ///
    /// Usage this month is reduced by the same amount, clamped at zero.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `amount` is not positive.
    /// - `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn refund(
        &self,
        account_id: &AccountId,
        amount: i64,
        job_id: JobId,
        reason: &str,
    ) -> LedgerResult<RefundOutcome> {
        require_positive(amount)?;

        let mut overflowed = false;
        let outcome = self.store.mutate_account(account_id, &mut |account| {
            let Some(new_balance) = account.credits_balance.checked_add(amount) else {
                overflowed = true;
                return Mutation::Skip;
            };
            overflowed = false;
            account.credits_balance = new_balance;
            account.credits_used_this_month = (account.credits_used_this_month - amount).max(0);
            Mutation::Apply(vec![CreditTransaction::refund(
                account.id,
                amount,
                account.credits_balance,
                job_id,
                reason.to_string(),
            )])
        })?;
        if overflowed {
            return Err(balance_overflow(amount));
        }

        match outcome {
            MutationOutcome::Applied { account, .. } => {
                tracing::info!(
                    account_id = %account_id,
                    job_id = %job_id,
                    amount,
                    new_balance = account.credits_balance,
                    "Credits refunded"
                );
                Ok(RefundOutcome::Refunded {
                    new_balance: account.credits_balance,
                })
            }
            MutationOutcome::Duplicate { account, .. } => {
                tracing::warn!(account_id = %account_id, job_id = %job_id, "Refund already applied");
                Ok(RefundOutcome::AlreadyRefunded {
                    balance: account.credits_balance,
                })
            }
            MutationOutcome::Skipped { account } => Ok(RefundOutcome::AlreadyRefunded {
                balance: account.credits_balance,
            }),
        }
    }

    /// Add purchased credits. Applied at most once per `payment_ref`.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if `credits` is not positive, the
    ///   payment reference is empty, or the balance would overflow.
    /// - `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn add_purchase(
        &self,
        account_id: &AccountId,
        credits: i64,
        payment_ref: &str,
    ) -> LedgerResult<PurchaseOutcome> {
        require_positive(credits)?;
        if payment_ref.trim().is_empty() {
            return Err(LedgerError::InvalidAmount(
                "payment reference must not be empty".into(),
            ));
        }

        let mut overflowed = false;
        let outcome = self.store.mutate_account(account_id, &mut |account| {
            let Some(new_balance) = account.credits_balance.checked_add(credits) else {
                overflowed = true;
                return Mutation::Skip;
            };
            overflowed = false;
            account.credits_balance = new_balance;
            Mutation::Apply(vec![CreditTransaction::purchase(
                account.id,
                credits,
                account.credits_balance,
                payment_ref,
            )])
        })?;
        if overflowed {
            return Err(balance_overflow(credits));
        }

        match outcome {
            MutationOutcome::Applied { account, .. } => {
                tracing::info!(
                    account_id = %account_id,
                    payment_ref = %payment_ref,
                    credits,
                    new_balance = account.credits_balance,
                    "Credits purchased"
                );
                Ok(PurchaseOutcome::Credited {
                    new_balance: account.credits_balance,
                })
            }
            MutationOutcome::Duplicate { account, .. } => {
                tracing::info!(
                    account_id = %account_id,
                    payment_ref = %payment_ref,
                    "Duplicate payment confirmation ignored"
                );
                Ok(PurchaseOutcome::Duplicate {
                    balance: account.credits_balance,
                })
            }
            MutationOutcome::Skipped { account } => Ok(PurchaseOutcome::Duplicate {
                balance: account.credits_balance,
            }),
        }
    }

    /// Switch the account's tier and refresh its allocation snapshot.
    ///
    /// Switching to the current tier changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn update_tier(&self, account_id: &AccountId, new_tier: Tier) -> LedgerResult<Account> {
        let outcome = self.store.mutate_account(account_id, &mut |account| {
            let previous = account.tier;
            if previous == new_tier {
                return Mutation::Skip;
            }
            account.apply_tier(new_tier);
            Mutation::Apply(vec![CreditTransaction::tier_change(
                account.id,
                previous,
                new_tier,
                account.credits_balance,
            )])
        })?;

        match outcome {
            MutationOutcome::Applied { account, .. } => {
                tracing::info!(account_id = %account_id, tier = %new_tier, "Tier updated");
                Ok(account)
            }
            MutationOutcome::Skipped { account } => Ok(account),
            MutationOutcome::Duplicate {
                idempotency_key, ..
            } => Err(unexpected_duplicate(&idempotency_key)),
        }
    }

    /// Reset the account for a new period if its current one has ended.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn reset_monthly(&self, account_id: &AccountId) -> LedgerResult<ResetOutcome> {
        self.reset_monthly_at(account_id, Utc::now())
    }

    /// [`reset_monthly`](Self::reset_monthly) evaluated at `now`.
    ///
    /// The new balance is the allocation plus the unused balance capped at
    /// the rollover cap. The grant is recorded as one `monthly_reset`
    /// transaction; credits above the cap are removed by a second one, so
    /// the transaction log keeps summing to the balance.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn reset_monthly_at(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> LedgerResult<ResetOutcome> {
        let mut summary = None;

        let outcome = self.store.mutate_account(account_id, &mut |account| {
            if !calendar::month_elapsed(account.last_credit_reset, now) {
                return Mutation::Skip;
            }

            let previous_balance = account.credits_balance;
            let rollover = account.rollover_amount();
            let new_balance = account.monthly_credits + rollover;

            let mut transactions = Vec::with_capacity(2);
            let expired = previous_balance - rollover;
            if expired != 0 {
                transactions.push(CreditTransaction::rollover_expiry(
                    account.id,
                    expired,
                    rollover,
                    account.rollover_cap,
                ));
            }
            transactions.push(CreditTransaction::monthly_grant(
                account.id,
                account.monthly_credits,
                new_balance,
                account.tier,
            ));

            account.credits_balance = new_balance;
            account.credits_used_this_month = 0;
            account.last_credit_reset = now;

            summary = Some(ResetSummary {
                previous_balance,
                new_balance,
                rolled_over_amount: rollover,
                monthly_credits: account.monthly_credits,
            });
            Mutation::Apply(transactions)
        })?;

        match (outcome, summary) {
            (MutationOutcome::Applied { .. }, Some(summary)) => {
                tracing::info!(
                    account_id = %account_id,
                    previous_balance = summary.previous_balance,
                    rolled_over = summary.rolled_over_amount,
                    new_balance = summary.new_balance,
                    "Monthly credits reset"
                );
                Ok(ResetOutcome::Reset(summary))
            }
            (MutationOutcome::Skipped { account } | MutationOutcome::Applied { account, .. }, _) => {
                tracing::debug!(account_id = %account_id, "Reset not due");
                Ok(ResetOutcome::NotDue {
                    next_reset: account.next_reset(),
                })
            }
            (MutationOutcome::Duplicate {
                idempotency_key, ..
            }, _) => Err(unexpected_duplicate(&idempotency_key)),
        }
    }

    /// Fetch an account.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn get_account(&self, account_id: &AccountId) -> LedgerResult<Account> {
        self.store
            .get_account(account_id)?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Project the account's credit position.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn get_credit_summary(&self, account_id: &AccountId) -> LedgerResult<CreditSummary> {
        Ok(CreditSummary::from(&self.get_account(account_id)?))
    }

    /// An account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::AccountNotFound` if the account doesn't exist.
    pub fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> LedgerResult<Vec<CreditTransaction>> {
        self.get_account(account_id)?;
        Ok(self
            .store
            .list_transactions_by_account(account_id, limit, offset)?)
    }

    /// Every transaction recorded against `job_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn transactions_for_job(
        &self,
        account_id: &AccountId,
        job_id: &JobId,
    ) -> LedgerResult<Vec<CreditTransaction>> {
        Ok(self.store.transactions_for_job(account_id, job_id)?)
    }
}

fn require_positive(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn balance_overflow(amount: i64) -> LedgerError {
    LedgerError::InvalidAmount(format!("adding {amount} credits would overflow the balance"))
}

fn first_id(transactions: &[CreditTransaction]) -> LedgerResult<TransactionId> {
    transactions
        .first()
        .map(|tx| tx.id)
        .ok_or_else(|| LedgerError::Store(StoreError::Conflict("mutation wrote no transaction".into())))
}

fn unexpected_duplicate(key: &str) -> LedgerError {
    LedgerError::Store(StoreError::Conflict(format!(
        "unexpected duplicate idempotency key: {key}"
    )))
}
