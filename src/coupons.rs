//! Coupons
//!
//! Customer-entered codes and the checks a code must pass before it discounts an order.

use std::fmt;

use decimal_percentage::Percentage;
use jiff::Timestamp;
use rusty_money::{Money, iso::Currency};
use thiserror::Error;

use crate::{
    customers::CustomerHistory,
    ids::ConstructId,
    limits::UsageLimits,
    orders::OrderSnapshot,
    pricing::DiscountError,
    promotions::actions::{Action, ActionBase, ActionOutcome},
    schedule::Schedule,
};

/// A normalized coupon code: trimmed and upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CouponCode(String);

impl CouponCode {
    /// Normalize a raw code, or `None` if nothing but whitespace was entered.
    pub fn new(raw: &str) -> Option<Self> {
        let code = raw.trim().to_uppercase();

        if code.is_empty() {
            None
        } else {
            Some(Self(code))
        }
    }

    /// The normalized code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reasons a coupon is rejected, in the order they are checked.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The coupon has been switched off.
    #[error("coupon {0} is not active")]
    CouponInactive(CouponCode),

    /// The coupon is outside its date window.
    #[error("coupon {0} has expired or is not yet valid")]
    CouponExpired(CouponCode),

    /// The order subtotal is below the coupon's minimum (minor units).
    #[error("coupon {code} requires a subtotal of at least {required}, order has {subtotal}")]
    MinOrderNotMet {
        /// Coupon code.
        code: CouponCode,

        /// Minimum subtotal in minor units.
        required: i64,

        /// Order subtotal in minor units.
        subtotal: i64,
    },

    /// The coupon has been redeemed as many times as it allows.
    #[error("coupon {0} has reached its usage limit")]
    UsageExhausted(CouponCode),

    /// The customer has redeemed the coupon as many times as they may.
    #[error("coupon {0} has reached its per-customer limit")]
    PerUserLimitExceeded(CouponCode),

    /// The coupon is only valid on a customer's first order.
    #[error("coupon {0} is only valid on a first order")]
    NotFirstOrder(CouponCode),
}

/// Errors produced while quoting a coupon.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CouponError {
    /// The coupon failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The discount could not be computed.
    #[error(transparent)]
    Discount(#[from] DiscountError),
}

/// The discount a coupon grants.
#[derive(Debug, Clone, PartialEq)]
pub enum CouponDiscount<'a> {
    /// Percentage off the subtotal, optionally capped.
    Percentage {
        /// Fraction of the subtotal to take off.
        percent: Percentage,

        /// Largest discount the coupon may give.
        cap: Option<Money<'a, Currency>>,
    },

    /// Fixed amount off the subtotal.
    Fixed(Money<'a, Currency>),

    /// Waive the shipping fee.
    FreeShipping,
}

impl<'a> CouponDiscount<'a> {
    /// The equivalent promotion action.
    pub fn action(&self) -> Action<'a> {
        match self {
            Self::Percentage { percent, cap } => Action::PercentageOff {
                percent: *percent,
                cap: *cap,
            },
            Self::Fixed(amount) => Action::FixedOff(*amount),
            Self::FreeShipping => Action::FreeShipping,
        }
    }
}

/// A customer-entered discount code.
#[derive(Debug, Clone, PartialEq)]
pub struct Coupon<'a> {
    code: CouponCode,
    discount: CouponDiscount<'a>,
    min_order: Option<Money<'a, Currency>>,
    limits: UsageLimits,
    first_order_only: bool,
    exclusive: bool,
    schedule: Schedule,
}

impl<'a> Coupon<'a> {
    /// Create a live coupon with no minimum, limits or restrictions.
    pub fn new(code: CouponCode, discount: CouponDiscount<'a>) -> Self {
        Self {
            code,
            discount,
            min_order: None,
            limits: UsageLimits::unlimited(),
            first_order_only: false,
            exclusive: false,
            schedule: Schedule::always(),
        }
    }

    /// Set the minimum order subtotal.
    #[must_use]
    pub fn with_min_order(mut self, min_order: Money<'a, Currency>) -> Self {
        self.min_order = Some(min_order);
        self
    }

    /// Set the usage limits.
    #[must_use]
    pub fn with_limits(mut self, limits: UsageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Restrict the coupon to a customer's first order.
    #[must_use]
    pub fn with_first_order_only(mut self, first_order_only: bool) -> Self {
        self.first_order_only = first_order_only;
        self
    }

    /// Mark the coupon as exclusive: when applied, no promotion applies alongside it.
    #[must_use]
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Set the activation schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Return the code
    pub fn code(&self) -> &CouponCode {
        &self.code
    }

    /// Return the discount
    pub fn discount(&self) -> &CouponDiscount<'a> {
        &self.discount
    }

    /// Return the usage limits
    pub fn limits(&self) -> &UsageLimits {
        &self.limits
    }

    /// Whether the coupon suppresses promotions
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// The construct id used for usage tracking.
    pub fn construct_id(&self) -> ConstructId {
        ConstructId::Coupon(self.code.clone())
    }

    /// Every currency referenced by the coupon's amounts.
    pub fn currencies(&self) -> impl Iterator<Item = &Currency> {
        let discount = match &self.discount {
            CouponDiscount::Percentage { cap, .. } => cap.as_ref().map(Money::currency),
            CouponDiscount::Fixed(amount) => Some(amount.currency()),
            CouponDiscount::FreeShipping => None,
        };

        discount
            .into_iter()
            .chain(self.min_order.as_ref().map(Money::currency))
    }

    /// Run the eligibility checks in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(
        &self,
        subtotal_minor: i64,
        now: Timestamp,
        history: &CustomerHistory,
    ) -> Result<(), ValidationError> {
        if !self.schedule.is_active {
            return Err(ValidationError::CouponInactive(self.code.clone()));
        }

        if !self.schedule.contains(now) {
            return Err(ValidationError::CouponExpired(self.code.clone()));
        }

        if let Some(min_order) = self.min_order {
            let required = min_order.to_minor_units();

            if subtotal_minor < required {
                return Err(ValidationError::MinOrderNotMet {
                    code: self.code.clone(),
                    required,
                    subtotal: subtotal_minor,
                });
            }
        }

        if self.limits.is_exhausted() {
            return Err(ValidationError::UsageExhausted(self.code.clone()));
        }

        if self
            .limits
            .is_exhausted_for(history.redemptions(&self.construct_id()))
        {
            return Err(ValidationError::PerUserLimitExceeded(self.code.clone()));
        }

        if self.first_order_only && !history.is_first_order() {
            return Err(ValidationError::NotFirstOrder(self.code.clone()));
        }

        Ok(())
    }

    /// Compute the discount against an explicit base.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscountError`] if the discount cannot be represented.
    pub fn apply(&self, base: &ActionBase<'_>) -> Result<ActionOutcome, DiscountError> {
        self.discount.action().apply(base)
    }

    /// Validate the coupon and compute its discount against the snapshot's subtotal.
    ///
    /// # Errors
    ///
    /// Returns a [`CouponError`] if validation fails or the discount cannot be computed.
    pub fn quote(
        &self,
        snapshot: &OrderSnapshot<'_, '_>,
        now: Timestamp,
        history: &CustomerHistory,
    ) -> Result<ActionOutcome, CouponError> {
        self.validate(snapshot.subtotal_minor(), now, history)?;

        let outcome = self.apply(&ActionBase {
            remaining: snapshot.subtotal_minor(),
            shipping: snapshot.order().shipping_fee().to_minor_units(),
            units: &[],
        })?;

        Ok(outcome)
    }
}
