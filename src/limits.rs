//! Usage Limits

/// Redemption limits shared by promotions and coupons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageLimits {
    /// Maximum redemptions across all customers; `0` is unlimited.
    pub usage_limit: u32,

    /// Maximum redemptions per customer; `0` is unlimited.
    pub per_user_limit: u32,

    /// Redemptions recorded so far, as read from the rule store.
    pub usage_count: u32,
}

impl UsageLimits {
    /// Limits with no constraints.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            usage_limit: 0,
            per_user_limit: 0,
            usage_count: 0,
        }
    }

    /// Limits with a global cap only.
    #[must_use]
    pub const fn with_usage_limit(limit: u32, used: u32) -> Self {
        Self {
            usage_limit: limit,
            per_user_limit: 0,
            usage_count: used,
        }
    }

    /// Limits with a per-customer cap only.
    #[must_use]
    pub const fn with_per_user_limit(limit: u32) -> Self {
        Self {
            usage_limit: 0,
            per_user_limit: limit,
            usage_count: 0,
        }
    }

    /// Whether the global counter needs a conditional increment on completion.
    #[must_use]
    pub const fn is_counted(&self) -> bool {
        self.usage_limit > 0
    }

    /// Whether the global limit has been reached.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.usage_limit > 0 && self.usage_count >= self.usage_limit
    }

    /// Whether a customer with `redemptions` prior uses has hit the per-customer limit.
    #[must_use]
    pub const fn is_exhausted_for(&self, redemptions: u32) -> bool {
        self.per_user_limit > 0 && redemptions >= self.per_user_limit
    }

    /// Check if these limits have any constraints
    #[must_use]
    pub const fn has_constraints(&self) -> bool {
        self.usage_limit > 0 || self.per_user_limit > 0
    }
}
