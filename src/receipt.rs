//! Receipt
//!
//! The priced order returned by the engine, and its serializable report form.

use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use serde::Serialize;
use smallvec::SmallVec;

use crate::{
    coupons::ValidationError,
    ids::{ConstructId, ProductUuid, VariantUuid},
    pricing::decimal_from_minor,
};

/// Which kind of construct produced a discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountSource {
    /// Combo pricing.
    Combo,

    /// An automatic promotion.
    Promotion,

    /// A customer-entered coupon.
    Coupon,
}

/// What a discount reduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountTarget {
    /// The merchandise subtotal.
    Merchandise,

    /// The shipping fee.
    Shipping,
}

/// One discount line on a priced order.
#[derive(Debug, Clone, PartialEq)]
pub struct Discount<'a> {
    /// Kind of construct.
    pub source: DiscountSource,

    /// The construct that produced the discount.
    pub construct: ConstructId,

    /// What the discount reduces.
    pub target: DiscountTarget,

    /// Amount taken off; always positive.
    pub amount: Money<'a, Currency>,
}

/// An order line as priced.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine<'a> {
    /// Product on the line.
    pub product: ProductUuid,

    /// Variant on the line.
    pub variant: Option<VariantUuid>,

    /// Units on the line.
    pub quantity: u32,

    /// Units consumed by combos.
    pub combo_units: u32,

    /// Standard unit price.
    pub unit_price: Money<'a, Currency>,

    /// `quantity * unit_price`.
    pub line_total: Money<'a, Currency>,

    /// Combo savings attributed to the line.
    pub combo_savings: Money<'a, Currency>,
}

/// What happened to the coupon presented with the order.
#[derive(Debug, Clone, PartialEq)]
pub enum CouponOutcome {
    /// No coupon was presented.
    None,

    /// The coupon passed validation and was applied.
    Applied(ConstructId),

    /// The coupon was rejected; the order was priced without it.
    Rejected(ValidationError),
}

/// The engine's output for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedOrder<'a> {
    lines: SmallVec<[PricedLine<'a>; 10]>,
    subtotal: Money<'a, Currency>,
    discounts: SmallVec<[Discount<'a>; 4]>,
    shipping_fee: Money<'a, Currency>,
    total: Money<'a, Currency>,
    coupon: CouponOutcome,
    currency: &'a Currency,
}

impl<'a> PricedOrder<'a> {
    /// Assemble a priced order.
    pub fn new(
        lines: impl IntoIterator<Item = PricedLine<'a>>,
        subtotal: Money<'a, Currency>,
        discounts: impl IntoIterator<Item = Discount<'a>>,
        shipping_fee: Money<'a, Currency>,
        total: Money<'a, Currency>,
        coupon: CouponOutcome,
    ) -> Self {
        Self {
            lines: lines.into_iter().collect(),
            subtotal,
            discounts: discounts.into_iter().collect(),
            shipping_fee,
            total,
            coupon,
            currency: subtotal.currency(),
        }
    }

    /// Priced lines, in order.
    pub fn lines(&self) -> &[PricedLine<'a>] {
        &self.lines
    }

    /// Merchandise subtotal at standard prices.
    pub fn subtotal(&self) -> Money<'a, Currency> {
        self.subtotal
    }

    /// Every discount, in the order it was applied.
    pub fn discounts(&self) -> &[Discount<'a>] {
        &self.discounts
    }

    /// Shipping fee after shipping discounts.
    pub fn shipping_fee(&self) -> Money<'a, Currency> {
        self.shipping_fee
    }

    /// Amount payable.
    pub fn total(&self) -> Money<'a, Currency> {
        self.total
    }

    /// Coupon outcome.
    pub fn coupon(&self) -> &CouponOutcome {
        &self.coupon
    }

    /// Order currency.
    pub fn currency(&self) -> &'a Currency {
        self.currency
    }

    /// The reason the coupon was rejected, if it was.
    pub fn coupon_rejection(&self) -> Option<&ValidationError> {
        match &self.coupon {
            CouponOutcome::Rejected(err) => Some(err),
            CouponOutcome::None | CouponOutcome::Applied(_) => None,
        }
    }

    /// Sum of every discount line.
    pub fn total_discount(&self) -> Money<'a, Currency> {
        Money::from_minor(
            self.discounts
                .iter()
                .map(|discount| discount.amount.to_minor_units())
                .sum(),
            self.currency,
        )
    }

    /// Constructs with at least one discount line, first appearance order, no repeats.
    pub fn applied_constructs(&self) -> Vec<ConstructId> {
        let mut applied: Vec<ConstructId> = Vec::new();

        for discount in &self.discounts {
            if !applied.contains(&discount.construct) {
                applied.push(discount.construct.clone());
            }
        }

        applied
    }

    /// A serializable view with amounts in major units.
    pub fn to_report(&self) -> PricedOrderReport {
        let amount = |money: &Money<'a, Currency>| {
            decimal_from_minor(money.to_minor_units(), money.currency())
        };

        PricedOrderReport {
            currency: self.currency.iso_alpha_code.to_string(),
            lines: self
                .lines
                .iter()
                .map(|line| PricedLineReport {
                    product_id: line.product.to_string(),
                    variant_id: line.variant.map(|variant| variant.to_string()),
                    quantity: line.quantity,
                    combo_units: line.combo_units,
                    unit_price: amount(&line.unit_price),
                    line_total: amount(&line.line_total),
                    combo_savings: amount(&line.combo_savings),
                })
                .collect(),
            subtotal: amount(&self.subtotal),
            discounts: self
                .discounts
                .iter()
                .map(|discount| DiscountReport {
                    source: discount.source,
                    construct_id: discount.construct.to_string(),
                    target: discount.target,
                    amount: amount(&discount.amount),
                })
                .collect(),
            total_discount: amount(&self.total_discount()),
            shipping_fee: amount(&self.shipping_fee),
            total: amount(&self.total),
            coupon: match &self.coupon {
                CouponOutcome::None => None,
                CouponOutcome::Applied(construct) => Some(CouponReport {
                    applied: true,
                    construct_id: Some(construct.to_string()),
                    rejection: None,
                }),
                CouponOutcome::Rejected(err) => Some(CouponReport {
                    applied: false,
                    construct_id: None,
                    rejection: Some(err.to_string()),
                }),
            },
        }
    }
}

/// Serializable priced order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedOrderReport {
    /// ISO currency code.
    pub currency: String,

    /// Priced lines.
    pub lines: Vec<PricedLineReport>,

    /// Subtotal at standard prices.
    pub subtotal: Decimal,

    /// Discount lines.
    pub discounts: Vec<DiscountReport>,

    /// Sum of the discount lines.
    pub total_discount: Decimal,

    /// Shipping fee after discounts.
    pub shipping_fee: Decimal,

    /// Amount payable.
    pub total: Decimal,

    /// Coupon outcome, when a coupon was presented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponReport>,
}

/// Serializable priced line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLineReport {
    /// Product id.
    pub product_id: String,

    /// Variant id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,

    /// Units on the line.
    pub quantity: u32,

    /// Units consumed by combos.
    pub combo_units: u32,

    /// Standard unit price.
    pub unit_price: Decimal,

    /// Standard line total.
    pub line_total: Decimal,

    /// Combo savings attributed to the line.
    pub combo_savings: Decimal,
}

/// Serializable discount line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountReport {
    /// Kind of construct.
    pub source: DiscountSource,

    /// Construct id, prefixed with its kind.
    pub construct_id: String,

    /// What the discount reduces.
    pub target: DiscountTarget,

    /// Amount taken off.
    pub amount: Decimal,
}

/// Serializable coupon outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponReport {
    /// Whether the coupon was applied.
    pub applied: bool,

    /// Coupon construct id when applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub construct_id: Option<String>,

    /// Rejection reason when not applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}
