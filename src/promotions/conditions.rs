//! Promotion Conditions
//!
//! Flat, AND-combined predicates over an order snapshot.

use rustc_hash::FxHashSet;
use rusty_money::{Money, iso::Currency};

use crate::{
    ids::{ProductUuid, VariantUuid},
    orders::{LineItem, OrderSnapshot},
};

/// Which variants of a product a rule targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantSelector {
    /// Any variant, or a line with no variant at all.
    AllVariants,

    /// Only the listed variants. Never empty.
    SpecificVariants(FxHashSet<VariantUuid>),
}

impl VariantSelector {
    /// Build a selector for specific variants, or `None` when `variants` is empty.
    pub fn specific(variants: impl IntoIterator<Item = VariantUuid>) -> Option<Self> {
        let variants: FxHashSet<VariantUuid> = variants.into_iter().collect();

        if variants.is_empty() {
            None
        } else {
            Some(Self::SpecificVariants(variants))
        }
    }

    /// Whether a line's variant satisfies this selector.
    pub fn matches(&self, variant: Option<VariantUuid>) -> bool {
        match self {
            Self::AllVariants => true,
            Self::SpecificVariants(variants) => {
                variant.is_some_and(|variant| variants.contains(&variant))
            }
        }
    }

    /// Whether this selector names specific variants.
    pub fn is_specific(&self) -> bool {
        matches!(self, Self::SpecificVariants(_))
    }
}

/// Single promotion condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition<'a> {
    /// Merchandise subtotal must reach this amount.
    MinAmount(Money<'a, Currency>),

    /// The order must contain at least this many units.
    MinQuantity(u32),

    /// The order must contain the product, optionally restricted to some variants.
    SpecificProduct {
        /// Product that must be present.
        product: ProductUuid,

        /// Variants of the product that count.
        variants: VariantSelector,
    },
}

impl Condition<'_> {
    /// Evaluate the condition against an order snapshot.
    pub fn matches(&self, snapshot: &OrderSnapshot<'_, '_>) -> bool {
        match self {
            Self::MinAmount(amount) => snapshot.subtotal_minor() >= amount.to_minor_units(),
            Self::MinQuantity(quantity) => snapshot.total_quantity() >= u64::from(*quantity),
            Self::SpecificProduct { .. } => snapshot.lines().any(|line| self.targets(line)),
        }
    }

    /// Whether this condition singles out the given line.
    ///
    /// Only product conditions target lines; amount and quantity conditions are order-wide.
    pub fn targets(&self, line: &LineItem<'_>) -> bool {
        match self {
            Self::SpecificProduct { product, variants } => {
                line.product() == *product && variants.matches(line.variant())
            }
            Self::MinAmount(_) | Self::MinQuantity(_) => false,
        }
    }

    /// Currency of any amount carried by the condition.
    pub fn currency(&self) -> Option<&Currency> {
        match self {
            Self::MinAmount(amount) => Some(amount.currency()),
            Self::MinQuantity(_) | Self::SpecificProduct { .. } => None,
        }
    }
}

/// Evaluate a condition list. All conditions must hold; an empty list applies globally.
pub fn all_match(conditions: &[Condition<'_>], snapshot: &OrderSnapshot<'_, '_>) -> bool {
    conditions
        .iter()
        .all(|condition| condition.matches(snapshot))
}

/// Whether a line is eligible for line-level actions under these conditions.
///
/// With no product conditions every line is eligible; otherwise a line must be targeted by at
/// least one of them.
pub fn line_is_eligible(conditions: &[Condition<'_>], line: &LineItem<'_>) -> bool {
    let mut product_conditions = conditions
        .iter()
        .filter(|condition| matches!(condition, Condition::SpecificProduct { .. }))
        .peekable();

    if product_conditions.peek().is_none() {
        return true;
    }

    product_conditions.any(|condition| condition.targets(line))
}
