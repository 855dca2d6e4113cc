//! Pricing arithmetic
//!
//! Minor-unit helpers shared by the action applier, the combo resolver and the rule loader.
//! Every monetary value is carried as an `i64` count of the currency's minor units while a
//! calculation is in flight and only wrapped back into [`Money`] at the edges.

use decimal_percentage::Percentage;
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use rusty_money::{Money, iso::Currency};
use thiserror::Error;

/// Errors specific to discount calculations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscountError {
    /// Percentage calculation could not be safely converted.
    #[error("percentage conversion overflowed or was not finite")]
    PercentConversion,

    /// Minor-unit arithmetic overflowed.
    #[error("monetary arithmetic overflowed")]
    Overflow,
}

/// Calculate a percentage of a minor unit amount, rounding half-up to whole minor units.
///
/// # Errors
///
/// Returns [`DiscountError::PercentConversion`] if the result cannot be represented.
pub fn percent_of_minor(percent: &Percentage, minor: i64) -> Result<i64, DiscountError> {
    let minor = Decimal::from_i64(minor).ok_or(DiscountError::PercentConversion)?;

    // `Percentage` only exposes its value through multiplication.
    ((*percent) * Decimal::ONE)
        .checked_mul(minor)
        .ok_or(DiscountError::PercentConversion)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(DiscountError::PercentConversion)
}

/// Clamp a computed discount into `[0, base]`.
pub fn clamp_discount(discount: i64, base: i64) -> i64 {
    discount.clamp(0, base.max(0))
}

/// Convert a decimal amount in major units (e.g. `12.50`) into minor units for `currency`.
///
/// Amounts finer than the currency's minor unit are rounded half-up.
pub fn minor_from_decimal(amount: Decimal, currency: &Currency) -> Option<i64> {
    let scale = 10_i64.checked_pow(currency.exponent)?;

    amount
        .checked_mul(Decimal::from(scale))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Convert a minor unit amount into a decimal amount in major units.
pub fn decimal_from_minor(minor: i64, currency: &Currency) -> Decimal {
    Decimal::new(minor, currency.exponent)
}

/// Wrap a minor unit amount as [`Money`].
pub fn money<'a>(minor: i64, currency: &'a Currency) -> Money<'a, Currency> {
    Money::from_minor(minor, currency)
}

/// Multiply a unit price by a quantity.
///
/// # Errors
///
/// Returns [`DiscountError::Overflow`] if the product does not fit in an `i64`.
pub fn line_total_minor(unit_minor: i64, quantity: u32) -> Result<i64, DiscountError> {
    unit_minor
        .checked_mul(i64::from(quantity))
        .ok_or(DiscountError::Overflow)
}

/// Split `amount` across `weights` proportionally, using largest-remainder rounding so the
/// parts always sum to exactly `amount`.
///
/// Ties on the remainder go to the earliest weight. When every weight is zero the whole
/// amount lands on the first part.
///
/// # Errors
///
/// Returns [`DiscountError::Overflow`] if intermediate arithmetic overflows.
pub fn distribute_proportionally(amount: i64, weights: &[i64]) -> Result<Vec<i64>, DiscountError> {
    let total: i128 = weights.iter().map(|weight| i128::from(*weight)).sum();

    if weights.is_empty() {
        return Ok(Vec::new());
    }

    if total <= 0 {
        let mut parts = vec![0; weights.len()];

        if let Some(first) = parts.first_mut() {
            *first = amount;
        }

        return Ok(parts);
    }

    let amount_wide = i128::from(amount);

    let mut parts = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());

    for (idx, weight) in weights.iter().enumerate() {
        let scaled = amount_wide
            .checked_mul(i128::from(*weight))
            .ok_or(DiscountError::Overflow)?;

        parts.push(i64::try_from(scaled / total).map_err(|_err| DiscountError::Overflow)?);
        remainders.push((scaled % total, idx));
    }

    let allocated: i64 = parts.iter().sum();
    let mut leftover = amount - allocated;

    remainders.sort_by(|(a, a_idx), (b, b_idx)| b.cmp(a).then(a_idx.cmp(b_idx)));

    for (_, idx) in remainders {
        if leftover <= 0 {
            break;
        }

        if let Some(part) = parts.get_mut(idx) {
            *part += 1;
            leftover -= 1;
        }
    }

    Ok(parts)
}
