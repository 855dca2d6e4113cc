//! Orders

use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    ids::{CustomerUuid, OrderUuid, ProductUuid, VariantUuid},
    pricing::line_total_minor,
};

/// Errors related to order construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// A line's currency differs from the order currency (index, line currency, order currency).
    #[error("Line {0} has currency {1}, but order has currency {2}")]
    CurrencyMismatch(usize, &'static str, &'static str),

    /// The shipping fee is in a different currency to the order.
    #[error("Shipping fee has currency {0}, but order has currency {1}")]
    ShippingCurrencyMismatch(&'static str, &'static str),

    /// A line was added with a quantity of zero.
    #[error("Line {0} has a quantity of zero")]
    ZeroQuantity(usize),

    /// A line has a negative unit price.
    #[error("Line {0} has a negative unit price")]
    NegativePrice(usize),

    /// The shipping fee is negative.
    #[error("Shipping fee is negative")]
    NegativeShipping,

    /// Line totals do not fit in the minor unit range.
    #[error("Order subtotal overflowed")]
    Overflow,
}

/// A single order line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem<'a> {
    product: ProductUuid,
    variant: Option<VariantUuid>,
    size: Option<String>,
    quantity: u32,
    unit_price: Money<'a, Currency>,
}

impl<'a> LineItem<'a> {
    /// Create a line for a product without a variant or size.
    pub fn new(product: ProductUuid, quantity: u32, unit_price: Money<'a, Currency>) -> Self {
        Self {
            product,
            variant: None,
            size: None,
            quantity,
            unit_price,
        }
    }

    /// Set the line's variant.
    #[must_use]
    pub fn with_variant(mut self, variant: VariantUuid) -> Self {
        self.variant = Some(variant);
        self
    }

    /// Set the line's size.
    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Returns the product of the line
    pub fn product(&self) -> ProductUuid {
        self.product
    }

    /// Returns the variant of the line, if any
    pub fn variant(&self) -> Option<VariantUuid> {
        self.variant
    }

    /// Returns the size of the line, if any
    pub fn size(&self) -> Option<&str> {
        self.size.as_deref()
    }

    /// Returns the number of units on the line
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Returns the unit price
    pub fn unit_price(&self) -> &Money<'a, Currency> {
        &self.unit_price
    }

    /// Unit price in minor units.
    pub fn unit_minor(&self) -> i64 {
        self.unit_price.to_minor_units()
    }
}

/// An order awaiting pricing.
#[derive(Debug, Clone)]
pub struct Order<'a> {
    uuid: OrderUuid,
    customer: CustomerUuid,
    items: SmallVec<[LineItem<'a>; 10]>,
    shipping_fee: Money<'a, Currency>,
    subtotal_minor: i64,
    currency: &'a Currency,
}

impl<'a> Order<'a> {
    /// Create an empty order with no shipping fee.
    pub fn new(uuid: OrderUuid, customer: CustomerUuid, currency: &'a Currency) -> Self {
        Self {
            uuid,
            customer,
            items: SmallVec::new(),
            shipping_fee: Money::from_minor(0, currency),
            subtotal_minor: 0,
            currency,
        }
    }

    /// Create an order with the given lines and shipping fee.
    ///
    /// # Errors
    ///
    /// Returns an [`OrderError`] if a line or the shipping fee is in the wrong currency, a
    /// line has no units or a negative price, or the subtotal overflows.
    pub fn with_items(
        uuid: OrderUuid,
        customer: CustomerUuid,
        items: impl IntoIterator<Item = LineItem<'a>>,
        shipping_fee: Money<'a, Currency>,
        currency: &'a Currency,
    ) -> Result<Self, OrderError> {
        let items: SmallVec<[LineItem<'a>; 10]> = items.into_iter().collect();

        if shipping_fee.currency() != currency {
            return Err(OrderError::ShippingCurrencyMismatch(
                shipping_fee.currency().iso_alpha_code,
                currency.iso_alpha_code,
            ));
        }

        if shipping_fee.to_minor_units() < 0 {
            return Err(OrderError::NegativeShipping);
        }

        let subtotal_minor = items
            .iter()
            .enumerate()
            .try_fold(0_i64, |acc, (i, line)| {
                let line_currency = line.unit_price.currency();

                if line_currency != currency {
                    return Err(OrderError::CurrencyMismatch(
                        i,
                        line_currency.iso_alpha_code,
                        currency.iso_alpha_code,
                    ));
                }

                if line.quantity == 0 {
                    return Err(OrderError::ZeroQuantity(i));
                }

                if line.unit_minor() < 0 {
                    return Err(OrderError::NegativePrice(i));
                }

                let line_total = line_total_minor(line.unit_minor(), line.quantity)
                    .map_err(|_err| OrderError::Overflow)?;

                acc.checked_add(line_total).ok_or(OrderError::Overflow)
            })?;

        Ok(Self {
            uuid,
            customer,
            items,
            shipping_fee,
            subtotal_minor,
            currency,
        })
    }

    /// Returns the order uuid
    pub fn uuid(&self) -> OrderUuid {
        self.uuid
    }

    /// Returns the customer placing the order
    pub fn customer(&self) -> CustomerUuid {
        self.customer
    }

    /// Returns the order lines
    pub fn items(&self) -> &[LineItem<'a>] {
        &self.items
    }

    /// Iterate over the order lines.
    pub fn iter(&self) -> impl Iterator<Item = &LineItem<'a>> {
        self.items.iter()
    }

    /// Returns the order currency
    pub fn currency(&self) -> &'a Currency {
        self.currency
    }

    /// Returns the shipping fee before any discounts
    pub fn shipping_fee(&self) -> Money<'a, Currency> {
        self.shipping_fee
    }

    /// Sum of every line's `quantity * unit price`.
    pub fn subtotal(&self) -> Money<'a, Currency> {
        Money::from_minor(self.subtotal_minor, self.currency)
    }

    /// Subtotal in minor units.
    pub fn subtotal_minor(&self) -> i64 {
        self.subtotal_minor
    }

    /// Total number of units across every line.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// A snapshot of this order at standard prices.
    pub fn snapshot(&self) -> OrderSnapshot<'_, 'a> {
        OrderSnapshot::new(self, self.subtotal_minor)
    }
}

/// Read-only view of an order used by condition evaluation.
///
/// The subtotal can differ from the order's own subtotal once combo pricing has been applied.
#[derive(Debug, Clone, Copy)]
pub struct OrderSnapshot<'o, 'a> {
    order: &'o Order<'a>,
    subtotal_minor: i64,
}

impl<'o, 'a> OrderSnapshot<'o, 'a> {
    /// Create a snapshot with an explicit merchandise subtotal.
    pub fn new(order: &'o Order<'a>, subtotal_minor: i64) -> Self {
        Self {
            order,
            subtotal_minor,
        }
    }

    /// The order being evaluated.
    pub fn order(&self) -> &'o Order<'a> {
        self.order
    }

    /// Merchandise subtotal in minor units.
    pub fn subtotal_minor(&self) -> i64 {
        self.subtotal_minor
    }

    /// Total units across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.order.total_quantity()
    }

    /// Iterate over the order lines.
    pub fn lines(&self) -> impl Iterator<Item = &'o LineItem<'a>> {
        self.order.items.iter()
    }
}
