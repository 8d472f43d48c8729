//! Volume pricing for image batches.
//!
//! A batch is priced with graduated marginal rates: every image is charged
//! the rate of the volume tier its position in the batch falls into. Rates
//! are whole credits and may only decline from tier to tier, which makes the
//! total cost non-decreasing in batch size and the average cost per image
//! non-increasing.

use serde::{Deserialize, Serialize};

use crate::error::BillingError;

/// One step of the volume schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTier {
    /// First image position (1-based) charged at this rate.
    pub min_quantity: u32,
    /// Credits charged per image in this tier.
    pub credits_per_image: i64,
}

/// Pricing configuration for image batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Schedule ordered by `min_quantity`; the first tier starts at image 1.
    pub volume_tiers: Vec<VolumeTier>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            volume_tiers: vec![
                VolumeTier {
                    min_quantity: 1,
                    credits_per_image: 4,
                },
                VolumeTier {
                    min_quantity: 11,
                    credits_per_image: 3,
                },
                VolumeTier {
                    min_quantity: 26,
                    credits_per_image: 2,
                },
            ],
        }
    }
}

impl PricingConfig {
    /// Check the schedule against the volume-discount contract.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPricing` if the schedule is empty, does
    /// not start at image 1, has unordered breakpoints, or has a rate that is
    /// negative or higher than the one before it.
    pub fn validate(&self) -> Result<(), BillingError> {
        let first = self
            .volume_tiers
            .first()
            .ok_or_else(|| BillingError::InvalidPricing("schedule is empty".into()))?;

        if first.min_quantity != 1 {
            return Err(BillingError::InvalidPricing(
                "first tier must start at quantity 1".into(),
            ));
        }
        if first.credits_per_image <= 0 {
            return Err(BillingError::InvalidPricing(
                "base rate must be positive".into(),
            ));
        }

        for pair in self.volume_tiers.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.min_quantity <= prev.min_quantity {
                return Err(BillingError::InvalidPricing(format!(
                    "breakpoint {} does not follow {}",
                    next.min_quantity, prev.min_quantity
                )));
            }
            if next.credits_per_image < 0 || next.credits_per_image > prev.credits_per_image {
                return Err(BillingError::InvalidPricing(format!(
                    "rate {} at quantity {} must be between 0 and {}",
                    next.credits_per_image, next.min_quantity, prev.credits_per_image
                )));
            }
        }

        Ok(())
    }
}

/// Discount applied to a batch, for display and audit text only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DiscountInfo {
    /// Share of the undiscounted price saved, in `(0, 1]`.
    pub discount_fraction: f64,
    /// Price at the base rate.
    pub full_price: i64,
    /// Price actually charged.
    pub discounted_price: i64,
    /// `full_price - discounted_price`.
    pub savings: i64,
}

/// Prices image batches against a validated volume schedule.
#[derive(Debug, Clone)]
pub struct PricingCalculator {
    config: PricingConfig,
}

impl Default for PricingCalculator {
    fn default() -> Self {
        Self {
            config: PricingConfig::default(),
        }
    }
}

impl PricingCalculator {
    /// Build a calculator from a schedule.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::InvalidPricing` if the schedule is invalid.
    pub fn new(config: PricingConfig) -> Result<Self, BillingError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Total credits for a batch of `quantity` images.
    #[must_use]
    pub fn compute_cost(&self, quantity: u32) -> i64 {
        let tiers = &self.config.volume_tiers;
        let mut total = 0_i64;

        for (idx, tier) in tiers.iter().enumerate() {
            if quantity < tier.min_quantity {
                break;
            }
            let last_in_tier = tiers
                .get(idx + 1)
                .map_or(quantity, |next| (next.min_quantity - 1).min(quantity));
            let images = i64::from(last_in_tier - tier.min_quantity + 1);
            total += images * tier.credits_per_image;
        }

        total
    }

    /// Discount relative to the base rate, or `None` when nothing is saved.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_discount_info(&self, quantity: u32) -> Option<DiscountInfo> {
        let base_rate = self.config.volume_tiers.first()?.credits_per_image;
        let full_price = i64::from(quantity) * base_rate;
        let discounted_price = self.compute_cost(quantity);
        let savings = full_price - discounted_price;

        (savings > 0).then(|| DiscountInfo {
            discount_fraction: savings as f64 / full_price as f64,
            full_price,
            discounted_price,
            savings,
        })
    }

    /// Optimistic pre-check. The ledger's reservation is authoritative.
    #[must_use]
    pub const fn has_enough_credits(balance: i64, required: i64) -> bool {
        balance >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capped_at_25() -> PricingCalculator {
        PricingCalculator::new(PricingConfig {
            volume_tiers: vec![
                VolumeTier {
                    min_quantity: 1,
                    credits_per_image: 1,
                },
                VolumeTier {
                    min_quantity: 26,
                    credits_per_image: 0,
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn default_schedule_graduates() {
        let calc = PricingCalculator::default();
        assert_eq!(calc.compute_cost(1), 4);
        assert_eq!(calc.compute_cost(10), 40);
        assert_eq!(calc.compute_cost(11), 43);
        assert_eq!(calc.compute_cost(25), 85);
        assert_eq!(calc.compute_cost(30), 95);
    }

    #[test]
    fn zero_quantity_costs_nothing() {
        assert_eq!(PricingCalculator::default().compute_cost(0), 0);
    }

    #[test]
    fn capped_schedule_prices_thirty_images_at_twenty_five() {
        assert_eq!(capped_at_25().compute_cost(30), 25);
        assert_eq!(capped_at_25().compute_cost(12), 12);
    }

    #[test]
    fn cost_is_monotonic_and_average_never_rises() {
        for calc in [PricingCalculator::default(), capped_at_25()] {
            for q1 in 1..=120_u32 {
                for q2 in (q1 + 1)..=121 {
                    let (c1, c2) = (calc.compute_cost(q1), calc.compute_cost(q2));
                    assert!(c1 <= c2, "cost({q1})={c1} > cost({q2})={c2}");
                    // c1/q1 >= c2/q2, compared without division
                    assert!(
                        c1 * i64::from(q2) >= c2 * i64::from(q1),
                        "average rose between {q1} and {q2}"
                    );
                }
            }
        }
    }

    #[test]
    fn no_discount_below_first_breakpoint() {
        let calc = PricingCalculator::default();
        assert!(calc.get_discount_info(10).is_none());
    }

    #[test]
    fn discount_info_reports_savings() {
        let info = PricingCalculator::default().get_discount_info(30).unwrap();
        assert_eq!(info.full_price, 120);
        assert_eq!(info.discounted_price, 95);
        assert_eq!(info.savings, 25);
        assert!((info.discount_fraction - 25.0 / 120.0).abs() < 1e-9);
    }

    #[test]
    fn has_enough_credits_is_inclusive() {
        assert!(PricingCalculator::has_enough_credits(25, 25));
        assert!(!PricingCalculator::has_enough_credits(5, 25));
    }

    #[test]
    fn rejects_rising_rates() {
        let config = PricingConfig {
            volume_tiers: vec![
                VolumeTier {
                    min_quantity: 1,
                    credits_per_image: 2,
                },
                VolumeTier {
                    min_quantity: 5,
                    credits_per_image: 3,
                },
            ],
        };
        assert!(matches!(
            PricingCalculator::new(config),
            Err(BillingError::InvalidPricing(_))
        ));
    }

    #[test]
    fn rejects_schedule_not_starting_at_one() {
        let config = PricingConfig {
            volume_tiers: vec![VolumeTier {
                min_quantity: 2,
                credits_per_image: 2,
            }],
        };
        assert!(config.validate().is_err());
        assert!(PricingConfig { volume_tiers: vec![] }.validate().is_err());
    }
}
