//! Promotion Actions
//!
//! Turns one action and an eligible base into a discount amount.

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};

use crate::pricing::{DiscountError, clamp_discount, percent_of_minor};

/// "Buy X, get Y" parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuyGet {
    /// Units that must be bought before any are discounted.
    pub buy: u32,

    /// Units discounted after each `buy` units.
    pub get: u32,

    /// Discount applied to each "get" unit.
    pub discount: Percentage,
}

impl BuyGet {
    /// Create buy/get parameters.
    pub fn new(buy: u32, get: u32, discount: Percentage) -> Self {
        Self {
            buy,
            get,
            discount,
        }
    }

    /// Buy `buy`, get `get` free.
    pub fn free(buy: u32, get: u32) -> Self {
        Self::new(buy, get, Percentage::from(Decimal::ONE))
    }

    /// How many of `units` purchased units are discounted.
    ///
    /// Every complete group of `buy + get` units discounts `get`. A trailing partial group
    /// discounts whatever it holds beyond `buy`.
    pub fn discounted_units(&self, units: u64) -> u64 {
        let buy = u64::from(self.buy);
        let get = u64::from(self.get);
        let group = buy.saturating_add(get);

        if buy == 0 || get == 0 {
            return 0;
        }

        let full_groups = units / group;
        let remainder = units % group;

        full_groups
            .saturating_mul(get)
            .saturating_add(remainder.saturating_sub(buy))
    }

    /// Discount earned on runs of equally priced units.
    ///
    /// The discounted units are always the cheapest ones. Work grows with the number of
    /// runs, never with the unit count.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscountError`] if the percentage or sum cannot be represented.
    pub fn discount_minor(&self, runs: &[UnitRun]) -> Result<i64, DiscountError> {
        let units = runs
            .iter()
            .try_fold(0_u64, |acc, run| acc.checked_add(run.count))
            .ok_or(DiscountError::Overflow)?;

        let mut left = self.discounted_units(units);

        if left == 0 {
            return Ok(0);
        }

        let mut sorted = runs.to_vec();
        sorted.sort_unstable_by_key(|run| run.unit_minor);

        let mut discounted_total = 0_i64;

        for run in sorted {
            if left == 0 {
                break;
            }

            let take = run.count.min(left);
            let subtotal = i64::try_from(take)
                .ok()
                .and_then(|take| run.unit_minor.checked_mul(take))
                .ok_or(DiscountError::Overflow)?;

            discounted_total = discounted_total
                .checked_add(subtotal)
                .ok_or(DiscountError::Overflow)?;
            left = left.saturating_sub(take);
        }

        percent_of_minor(&self.discount, discounted_total)
    }
}

/// Units of one line sharing a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRun {
    /// Price of each unit, in minor units.
    pub unit_minor: i64,

    /// Number of units at that price.
    pub count: u64,
}

impl UnitRun {
    /// Create a run of `count` units at `unit_minor` each.
    pub fn new(unit_minor: i64, count: u64) -> Self {
        Self { unit_minor, count }
    }
}

/// Single promotion action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action<'a> {
    /// Percentage off the base, optionally capped.
    PercentageOff {
        /// Fraction of the base to take off.
        percent: Percentage,

        /// Largest discount this action may give.
        cap: Option<Money<'a, Currency>>,
    },

    /// Fixed amount off the base.
    FixedOff(Money<'a, Currency>),

    /// Waive the shipping fee.
    FreeShipping,

    /// Buy X, get Y discounted.
    Bogo(BuyGet),
}

/// What an action is computed against.
#[derive(Debug, Clone, Copy)]
pub struct ActionBase<'u> {
    /// Merchandise amount still discountable, in minor units.
    pub remaining: i64,

    /// Shipping fee still payable, in minor units.
    pub shipping: i64,

    /// Units eligible for unit-level actions, grouped by price.
    pub units: &'u [UnitRun],
}

/// The effect of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// A discount off the merchandise subtotal.
    Merchandise(i64),

    /// A discount off the shipping fee.
    Shipping(i64),
}

impl ActionOutcome {
    /// The amount in minor units.
    pub fn amount(&self) -> i64 {
        match self {
            Self::Merchandise(amount) | Self::Shipping(amount) => *amount,
        }
    }
}

impl Action<'_> {
    /// Compute this action's discount against `base`.
    ///
    /// Merchandise results are clamped to `[0, base.remaining]`; shipping results to
    /// `[0, base.shipping]`.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscountError`] if a percentage or sum cannot be represented.
    pub fn apply(&self, base: &ActionBase<'_>) -> Result<ActionOutcome, DiscountError> {
        let outcome = match self {
            Self::PercentageOff { percent, cap } => {
                let discount = percent_of_minor(percent, base.remaining)?;
                let capped = cap.map_or(discount, |cap| discount.min(cap.to_minor_units()));

                ActionOutcome::Merchandise(clamp_discount(capped, base.remaining))
            }
            Self::FixedOff(amount) => {
                ActionOutcome::Merchandise(clamp_discount(amount.to_minor_units(), base.remaining))
            }
            Self::FreeShipping => ActionOutcome::Shipping(base.shipping.max(0)),
            Self::Bogo(buy_get) => {
                let discount = buy_get.discount_minor(base.units)?;

                ActionOutcome::Merchandise(clamp_discount(discount, base.remaining))
            }
        };

        Ok(outcome)
    }

    /// Currency of any amount carried by the action.
    pub fn currency(&self) -> Option<&Currency> {
        match self {
            Self::PercentageOff { cap, .. } => cap.as_ref().map(Money::currency),
            Self::FixedOff(amount) => Some(amount.currency()),
            Self::FreeShipping | Self::Bogo(_) => None,
        }
    }

    /// Whether the action needs per-unit prices.
    pub fn uses_units(&self) -> bool {
        matches!(self, Self::Bogo(_))
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::GBP;
    use testresult::TestResult;

    use super::*;

    fn percent(points: i64) -> Percentage {
        Percentage::from(Decimal::new(points, 2))
    }

    fn base(remaining: i64) -> ActionBase<'static> {
        ActionBase {
            remaining,
            shipping: 0,
            units: &[],
        }
    }

    #[test]
    fn percentage_off_respects_cap() -> TestResult {
        let action = Action::PercentageOff {
            percent: percent(20),
            cap: Some(Money::from_minor(15_000, GBP)),
        };

        assert_eq!(
            action.apply(&base(100_000))?,
            ActionOutcome::Merchandise(15_000)
        );

        Ok(())
    }

    #[test]
    fn percentage_off_without_cap_takes_full_percentage() -> TestResult {
        let action = Action::PercentageOff {
            percent: percent(20),
            cap: None,
        };

        assert_eq!(
            action.apply(&base(100_000))?,
            ActionOutcome::Merchandise(20_000)
        );

        Ok(())
    }

    #[test]
    fn percentage_off_rounds_half_up() -> TestResult {
        let action = Action::PercentageOff {
            percent: percent(15),
            cap: None,
        };

        // 15% of 1.10 is 16.5p.
        assert_eq!(action.apply(&base(110))?, ActionOutcome::Merchandise(17));

        Ok(())
    }

    #[test]
    fn fixed_off_never_exceeds_base() -> TestResult {
        let action = Action::FixedOff(Money::from_minor(5_000, GBP));

        assert_eq!(action.apply(&base(3_000))?, ActionOutcome::Merchandise(3_000));
        assert_eq!(action.apply(&base(0))?, ActionOutcome::Merchandise(0));

        Ok(())
    }

    #[test]
    fn free_shipping_discounts_the_shipping_fee() -> TestResult {
        let outcome = Action::FreeShipping.apply(&ActionBase {
            remaining: 10_000,
            shipping: 499,
            units: &[],
        })?;

        assert_eq!(outcome, ActionOutcome::Shipping(499));
        assert_eq!(outcome.amount(), 499);

        Ok(())
    }

    #[test]
    fn bogo_discounts_cheapest_units() -> TestResult {
        let action = Action::Bogo(BuyGet::free(2, 1));

        let outcome = action.apply(&ActionBase {
            remaining: 10_000,
            shipping: 0,
            units: &[
                UnitRun::new(1_000, 1),
                UnitRun::new(400, 1),
                UnitRun::new(700, 1),
            ],
        })?;

        assert_eq!(outcome, ActionOutcome::Merchandise(400));

        Ok(())
    }

    #[test]
    fn bogo_with_partial_discount() -> TestResult {
        let action = Action::Bogo(BuyGet::new(1, 1, percent(50)));

        let outcome = action.apply(&ActionBase {
            remaining: 10_000,
            shipping: 0,
            units: &[
                UnitRun::new(1_000, 1),
                UnitRun::new(600, 1),
                UnitRun::new(800, 1),
                UnitRun::new(200, 1),
            ],
        })?;

        // Two groups of two: the two cheapest units (200 + 600) are half price.
        assert_eq!(outcome, ActionOutcome::Merchandise(400));

        Ok(())
    }

    #[test]
    fn bogo_is_clamped_to_remaining_base() -> TestResult {
        let action = Action::Bogo(BuyGet::free(1, 1));

        let outcome = action.apply(&ActionBase {
            remaining: 100,
            shipping: 0,
            units: &[UnitRun::new(1_000, 2)],
        })?;

        assert_eq!(outcome, ActionOutcome::Merchandise(100));

        Ok(())
    }

    #[test]
    fn discounted_units_handles_partial_groups() {
        let buy_two_get_one = BuyGet::free(2, 1);
        let buy_two_get_two = BuyGet::free(2, 2);

        assert_eq!(buy_two_get_one.discounted_units(2), 0);
        assert_eq!(buy_two_get_one.discounted_units(3), 1);
        assert_eq!(buy_two_get_one.discounted_units(7), 2);
        assert_eq!(buy_two_get_two.discounted_units(3), 1);
        assert_eq!(buy_two_get_two.discounted_units(4), 2);
        assert_eq!(BuyGet::free(0, 1).discounted_units(5), 0);
    }

    #[test]
    fn bogo_handles_huge_quantities_without_expanding_units() -> TestResult {
        let action = Action::Bogo(BuyGet::free(1, 1));
        let quantity = u64::from(u32::MAX);

        let outcome = action.apply(&ActionBase {
            remaining: i64::MAX,
            shipping: 0,
            units: &[UnitRun::new(2, quantity), UnitRun::new(1, 1)],
        })?;

        // half of the units rounded down, the single cheap unit first
        let discounted = quantity.saturating_add(1) / 2;
        let expected = 1 + 2 * (i64::try_from(discounted)? - 1);

        assert_eq!(outcome, ActionOutcome::Merchandise(expected));

        Ok(())
    }

    #[test]
    fn bogo_reports_overflowing_unit_totals() {
        let buy_get = BuyGet::free(1, 1);

        assert_eq!(
            buy_get.discount_minor(&[UnitRun::new(i64::MAX, 4)]),
            Err(DiscountError::Overflow)
        );
    }
}
