//! Credit transaction types for backdrop.
//!
//! Every balance mutation appends one or more transactions. The signed amounts
//! of an account's transactions always sum to its current balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, JobId, Tier, TransactionId};

/// An immutable audit record of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Signed credit amount. Positive = credit, negative = debit.
    pub amount: i64,

    /// Type of transaction.
    pub kind: TransactionKind,

    /// The job this transaction reserves or refunds credits for.
    pub job_id: Option<JobId>,

    /// Balance after this transaction.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Deduplication key; a key is applied at most once per store.
    pub idempotency_key: Option<String>,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    fn new(
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        balance_after: i64,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            kind,
            job_id: None,
            balance_after,
            description,
            idempotency_key: None,
            created_at: Utc::now(),
        }
    }

    /// A reservation debit for a job.
    #[must_use]
    pub fn usage(
        account_id: AccountId,
        amount: i64,
        balance_after: i64,
        job_id: JobId,
        description: String,
    ) -> Self {
        let mut tx = Self::new(
            account_id,
            -amount.abs(), // Always negative for usage
            TransactionKind::Usage,
            balance_after,
            description,
        );
        tx.job_id = Some(job_id);
        tx
    }

    /// A compensating credit for a job, deduplicated per job.
    #[must_use]
    pub fn refund(
        account_id: AccountId,
        amount: i64,
        balance_after: i64,
        job_id: JobId,
        reason: String,
    ) -> Self {
        let mut tx = Self::new(
            account_id,
            amount.abs(),
            TransactionKind::Refund,
            balance_after,
            reason,
        );
        tx.job_id = Some(job_id);
        tx.idempotency_key = Some(Self::refund_key(job_id));
        tx
    }

    /// An à la carte purchase, deduplicated per external payment reference.
    #[must_use]
    pub fn purchase(
        account_id: AccountId,
        credits: i64,
        balance_after: i64,
        payment_ref: &str,
    ) -> Self {
        let mut tx = Self::new(
            account_id,
            credits,
            TransactionKind::Purchase,
            balance_after,
            format!("Purchased {credits} credits"),
        );
        tx.idempotency_key = Some(Self::purchase_key(payment_ref));
        tx
    }

    /// The periodic allocation grant for a tier.
    #[must_use]
    pub fn monthly_grant(
        account_id: AccountId,
        monthly_credits: i64,
        balance_after: i64,
        tier: Tier,
    ) -> Self {
        Self::new(
            account_id,
            monthly_credits,
            TransactionKind::MonthlyReset,
            balance_after,
            format!("Monthly {} allocation", tier.config().display_name),
        )
    }

    /// Removal of unused credits above the rollover cap at a reset.
    #[must_use]
    pub fn rollover_expiry(
        account_id: AccountId,
        expired: i64,
        balance_after: i64,
        rollover_cap: i64,
    ) -> Self {
        Self::new(
            account_id,
            -expired,
            TransactionKind::MonthlyReset,
            balance_after,
            format!("Expired {expired} unused credits above rollover cap of {rollover_cap}"),
        )
    }

    /// A zero-amount audit record of a tier change.
    #[must_use]
    pub fn tier_change(account_id: AccountId, from: Tier, to: Tier, balance_after: i64) -> Self {
        Self::new(
            account_id,
            0,
            TransactionKind::TierChange,
            balance_after,
            format!("Tier changed from {from} to {to}"),
        )
    }

    /// Idempotency key of the refund for `job_id`.
    #[must_use]
    pub fn refund_key(job_id: JobId) -> String {
        format!("refund:{job_id}")
    }

    /// Idempotency key of the purchase confirmed by `payment_ref`.
    #[must_use]
    pub fn purchase_key(payment_ref: &str) -> String {
        format!("purchase:{payment_ref}")
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits bought outside the subscription cycle.
    Purchase,

    /// Credits reserved for a submitted job.
    Usage,

    /// Reserved credits returned after a downstream failure.
    Refund,

    /// Periodic allocation grant (and expiry of credits above the cap).
    MonthlyReset,

    /// Tier switch, recorded for audit continuity.
    TierChange,
}

impl TransactionKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::MonthlyReset => "monthly_reset",
            Self::TierChange => "tier_change",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_transaction_is_negative_and_tagged() {
        let job_id = JobId::generate();
        let tx = CreditTransaction::usage(AccountId::generate(), 25, 75, job_id, "batch".into());

        assert_eq!(tx.amount, -25);
        assert_eq!(tx.kind, TransactionKind::Usage);
        assert_eq!(tx.job_id, Some(job_id));
        assert!(tx.idempotency_key.is_none());
    }

    #[test]
    fn refund_is_keyed_by_job() {
        let job_id = JobId::generate();
        let tx = CreditTransaction::refund(AccountId::generate(), 25, 100, job_id, "x".into());

        assert_eq!(tx.amount, 25);
        assert_eq!(tx.idempotency_key, Some(format!("refund:{job_id}")));
    }

    #[test]
    fn purchase_is_keyed_by_payment_reference() {
        let tx = CreditTransaction::purchase(AccountId::generate(), 500, 600, "pay_123");
        assert_eq!(tx.idempotency_key.as_deref(), Some("purchase:pay_123"));
        assert_eq!(tx.kind, TransactionKind::Purchase);
    }

    #[test]
    fn tier_change_carries_no_amount() {
        let tx = CreditTransaction::tier_change(AccountId::generate(), Tier::Free, Tier::Pro, 10);
        assert_eq!(tx.amount, 0);
        assert_eq!(tx.description, "Tier changed from free to pro");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionKind::MonthlyReset).unwrap();
        assert_eq!(json, "\"monthly_reset\"");
        assert_eq!(TransactionKind::MonthlyReset.as_str(), "monthly_reset");
    }
}
