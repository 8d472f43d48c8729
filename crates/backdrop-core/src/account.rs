//! Account and subscription tier types for backdrop.
//!
//! An account carries a denormalized snapshot of its tier's monthly allocation
//! and rollover cap. The snapshot is rewritten whenever the tier changes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::error::BillingError;
use crate::AccountId;

// ============================================================================
// Constants
// ============================================================================

/// Free tier monthly credit allocation (granted at signup only).
pub const FREE_TIER_CREDITS: i64 = 10;

/// Starter tier monthly credit allocation.
pub const STARTER_TIER_CREDITS: i64 = 100;

/// Pro tier monthly credit allocation.
pub const PRO_TIER_CREDITS: i64 = 500;

/// Studio tier monthly credit allocation.
pub const STUDIO_TIER_CREDITS: i64 = 2000;

/// A credit-holding account.
///
/// Mutated only through the credit ledger; never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,

    /// Subscription tier.
    pub tier: Tier,

    /// Spendable credits. Never negative.
    pub credits_balance: i64,

    /// Credits granted at each monthly reset (tier snapshot).
    pub monthly_credits: i64,

    /// Maximum unused credits carried into the next period (tier snapshot).
    pub rollover_cap: i64,

    /// Credits reserved since the last reset, net of refunds. Never negative.
    pub credits_used_this_month: i64,

    /// When credits were last reset (or granted at signup).
    pub last_credit_reset: DateTime<Utc>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create an account on `tier` with an empty balance.
    ///
    /// The opening grant is recorded separately so that the transaction log
    /// explains every credit in the balance.
    #[must_use]
    pub fn new(id: AccountId, tier: Tier, now: DateTime<Utc>) -> Self {
        let config = tier.config();
        Self {
            id,
            tier,
            credits_balance: 0,
            monthly_credits: config.monthly_credits,
            rollover_cap: config.rollover_cap,
            credits_used_this_month: 0,
            last_credit_reset: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the balance covers `amount`.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.credits_balance >= amount
    }

    /// Switch tier and refresh the allocation snapshot.
    pub fn apply_tier(&mut self, tier: Tier) {
        let config = tier.config();
        self.tier = tier;
        self.monthly_credits = config.monthly_credits;
        self.rollover_cap = config.rollover_cap;
    }

    /// The next scheduled reset: one calendar month after the last one.
    #[must_use]
    pub fn next_reset(&self) -> DateTime<Utc> {
        calendar::add_one_month(self.last_credit_reset)
    }

    /// Whether the periodic reset batch should process this account at `now`.
    ///
    /// Free-tier accounts are never part of the periodic batch.
    #[must_use]
    pub fn is_reset_due(&self, now: DateTime<Utc>) -> bool {
        self.tier != Tier::Free && calendar::month_elapsed(self.last_credit_reset, now)
    }

    /// Credits carried over if the account were reset now.
    #[must_use]
    pub fn rollover_amount(&self) -> i64 {
        self.credits_balance.max(0).min(self.rollover_cap)
    }
}

/// Available subscription tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Free: one-time signup allocation, no rollover, excluded from resets.
    Free,

    /// Starter: 100 credits/month, up to 50 carried over.
    Starter,

    /// Pro: 500 credits/month, up to 250 carried over.
    Pro,

    /// Studio: 2000 credits/month, up to 1000 carried over.
    Studio,
}

impl Tier {
    /// Every tier, cheapest first.
    pub const ALL: [Self; 4] = [Self::Free, Self::Starter, Self::Pro, Self::Studio];

    /// Static configuration for this tier.
    #[must_use]
    pub const fn config(self) -> TierConfig {
        match self {
            Self::Free => TierConfig {
                tier: self,
                display_name: "Free",
                monthly_credits: FREE_TIER_CREDITS,
                rollover_cap: 0,
                monthly_price_cents: 0,
            },
            Self::Starter => TierConfig {
                tier: self,
                display_name: "Starter",
                monthly_credits: STARTER_TIER_CREDITS,
                rollover_cap: 50,
                monthly_price_cents: 900,
            },
            Self::Pro => TierConfig {
                tier: self,
                display_name: "Pro",
                monthly_credits: PRO_TIER_CREDITS,
                rollover_cap: 250,
                monthly_price_cents: 2900,
            },
            Self::Studio => TierConfig {
                tier: self,
                display_name: "Studio",
                monthly_credits: STUDIO_TIER_CREDITS,
                rollover_cap: 1000,
                monthly_price_cents: 9900,
            },
        }
    }

    /// Wire name of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Studio => "studio",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BillingError::UnknownTier(s.to_string()))
    }
}

/// Immutable per-tier configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierConfig {
    /// The tier this configuration describes.
    pub tier: Tier,
    /// Human-readable plan name.
    pub display_name: &'static str,
    /// Credits granted at each monthly reset.
    pub monthly_credits: i64,
    /// Maximum unused credits carried into the next period.
    pub rollover_cap: i64,
    /// Subscription price in cents per month.
    pub monthly_price_cents: i64,
}
