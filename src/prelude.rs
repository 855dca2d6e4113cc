//! Tally prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    catalog::{Catalog, CatalogEntry, CatalogError, CatalogSnapshot},
    combos::{Combo, ComboError, ComboItem, ComboStatus, ComboType},
    config::{ComboRepetition, ConfigError, EngineConfig},
    coupons::{Coupon, CouponCode, CouponDiscount, CouponError, ValidationError},
    customers::CustomerHistory,
    engine::{Completion, PricingContext, PricingEngine, PricingError, UsageClaim, UsageOutcome},
    ids::{ComboUuid, ConstructId, CustomerUuid, OrderUuid, ProductUuid, PromotionUuid, VariantUuid},
    limits::UsageLimits,
    orders::{LineItem, Order, OrderError},
    pricing::DiscountError,
    promotions::{
        Promotion, PromotionMeta,
        actions::{Action, BuyGet, UnitRun},
        conditions::{Condition, VariantSelector},
    },
    receipt::{CouponOutcome, Discount, DiscountSource, DiscountTarget, PricedOrder},
    rules::{ConfigurationError, RuleLoadError, RuleSet},
    schedule::Schedule,
    usage::{CompletionRecord, InMemoryUsageStore, UsageError, UsageStore},
};
