//! Rule Definitions
//!
//! Serde shapes of the rule store's promotion, coupon and combo records, and of orders
//! submitted for quoting.

use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{ComboUuid, CustomerUuid, OrderUuid, ProductUuid, PromotionUuid, VariantUuid};

fn default_true() -> bool {
    true
}

fn hundred() -> Decimal {
    Decimal::ONE_HUNDRED
}

/// Everything the rule store hands over for pricing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleDefinitions {
    /// Promotion records.
    pub promotions: Vec<PromotionDefinition>,

    /// Coupon records.
    pub coupons: Vec<CouponDefinition>,

    /// Combo records.
    pub combos: Vec<ComboDefinition>,
}

/// A rules document whose records have not been decoded yet.
///
/// Each record is decoded on its own so one malformed record cannot take the others down.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleDocument {
    /// Promotion records.
    pub promotions: Vec<serde_json::Value>,

    /// Coupon records.
    pub coupons: Vec<serde_json::Value>,

    /// Combo records.
    pub combos: Vec<serde_json::Value>,
}

/// How a product reference treats variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantModeDefinition {
    /// Any variant.
    #[default]
    AllVariants,

    /// Only the listed `variantIds`.
    SpecificVariants,
}

/// Promotion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionDefinition {
    /// Promotion id
    pub id: PromotionUuid,

    /// Operator-facing type label
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// AND-combined conditions
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,

    /// Actions applied in order
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,

    /// Inclusive start of the window
    #[serde(default)]
    pub start_date: Option<Timestamp>,

    /// Inclusive end of the window
    #[serde(default)]
    pub end_date: Option<Timestamp>,

    /// Operator on/off switch
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Whether the promotion combines with others
    #[serde(default)]
    pub stackable: bool,

    /// Higher applies first
    #[serde(default)]
    pub priority: i32,

    /// Global cap; 0 is unlimited
    #[serde(default)]
    pub usage_limit: u32,

    /// Per-customer cap; 0 is unlimited
    #[serde(default)]
    pub per_user_limit: u32,

    /// Redemptions so far
    #[serde(default)]
    pub usage_count: u32,
}

/// Promotion condition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConditionDefinition {
    /// Subtotal must reach `value` (major units).
    MinAmount {
        /// Threshold in major units
        value: Decimal,
    },

    /// Order must hold at least `value` units.
    MinQuantity {
        /// Unit threshold
        value: i64,
    },

    /// Order must contain the product.
    SpecificProduct {
        /// Product id
        #[serde(default)]
        product_id: Option<ProductUuid>,

        /// Variant handling
        #[serde(default)]
        variant_mode: VariantModeDefinition,

        /// Variants for `specific_variants`
        #[serde(default)]
        variant_ids: Option<Vec<VariantUuid>>,
    },
}

/// Promotion action record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ActionDefinition {
    /// Percentage (0-100) off, optionally capped.
    PercentageOff {
        /// Percentage points
        value: Decimal,

        /// Cap in major units
        #[serde(default)]
        max_discount: Option<Decimal>,
    },

    /// Fixed amount off (major units).
    FixedOff {
        /// Amount in major units
        value: Decimal,
    },

    /// Waive shipping.
    FreeShipping,

    /// Buy X, get Y discounted by `getDiscount` percent (default 100).
    Bogo {
        /// Units bought per group
        buy_quantity: i64,

        /// Units discounted per group
        get_quantity: i64,

        /// Percentage points off each discounted unit
        #[serde(default = "hundred")]
        get_discount: Decimal,
    },
}

/// Coupon discount kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponDiscountType {
    /// `discountValue` percent off.
    Percentage,

    /// `discountValue` off.
    Fixed,

    /// Waive shipping.
    FreeShipping,
}

/// Coupon record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponDefinition {
    /// Customer-entered code
    pub code: String,

    /// Discount kind
    pub discount_type: CouponDiscountType,

    /// Percentage points or amount, depending on the kind
    #[serde(default)]
    pub discount_value: Decimal,

    /// Cap for percentage coupons
    #[serde(default)]
    pub max_discount: Option<Decimal>,

    /// Minimum subtotal
    #[serde(default)]
    pub min_order_amount: Decimal,

    /// Global cap; 0 is unlimited
    #[serde(default)]
    pub usage_limit: u32,

    /// Per-customer cap; 0 is unlimited
    #[serde(default)]
    pub per_user_limit: u32,

    /// Only valid on a first order
    #[serde(default)]
    pub first_order_only: bool,

    /// Inclusive start of the window
    #[serde(default)]
    pub start_date: Option<Timestamp>,

    /// Inclusive end of the window
    #[serde(default)]
    pub end_date: Option<Timestamp>,

    /// Operator on/off switch
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Redemptions so far
    #[serde(default)]
    pub usage_count: u32,

    /// Suppresses every promotion when applied
    #[serde(default)]
    pub exclusive: bool,
}

/// Combo kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComboTypeDefinition {
    /// Group price.
    Bundle,

    /// Last item free.
    Bogo,

    /// Multi-unit price.
    MultiBuy,
}

/// Combo lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComboStatusDefinition {
    /// Available.
    #[default]
    Active,

    /// Switched off.
    Inactive,

    /// Retired.
    Archived,
}

/// Combo item record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboItemDefinition {
    /// Product id
    #[serde(default)]
    pub product_id: Option<ProductUuid>,

    /// A single required variant
    #[serde(default)]
    pub variant_id: Option<VariantUuid>,

    /// Units required
    pub quantity: i64,

    /// Variant handling
    #[serde(default)]
    pub variant_mode: VariantModeDefinition,

    /// Variants for `specific_variants`
    #[serde(default)]
    pub variant_ids: Option<Vec<VariantUuid>>,
}

/// Combo record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboDefinition {
    /// Combo id
    pub id: ComboUuid,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Combo kind
    #[serde(rename = "type")]
    pub kind: ComboTypeDefinition,

    /// Items, in order
    pub items: Vec<ComboItemDefinition>,

    /// Price of the items bought separately
    pub original_price: Decimal,

    /// Price of the combo
    pub combo_price: Decimal,

    /// Stated saving; checked against the prices when present
    #[serde(default)]
    pub savings: Option<Decimal>,

    /// Lifecycle
    #[serde(default)]
    pub status: ComboStatusDefinition,

    /// Inclusive start of the window
    #[serde(default)]
    pub start_date: Option<Timestamp>,

    /// Inclusive end of the window
    #[serde(default)]
    pub end_date: Option<Timestamp>,
}

/// An order submitted for quoting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDefinition {
    /// Order id; generated when absent
    #[serde(default)]
    pub id: Option<OrderUuid>,

    /// Customer placing the order
    pub customer_id: CustomerUuid,

    /// ISO currency code
    pub currency: String,

    /// Lines
    pub items: Vec<LineItemDefinition>,

    /// Shipping fee (major units)
    #[serde(default)]
    pub shipping_fee: Decimal,
}

/// Order line record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemDefinition {
    /// Product id
    pub product_id: ProductUuid,

    /// Variant id
    #[serde(default)]
    pub variant_id: Option<VariantUuid>,

    /// Size label
    #[serde(default)]
    pub size: Option<String>,

    /// Units
    pub quantity: u32,

    /// Unit price (major units)
    pub unit_price: Decimal,
}
