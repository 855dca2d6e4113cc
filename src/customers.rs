//! Customer History
//!
//! Facts about the customer that eligibility checks need, fetched by the caller before pricing.

use rustc_hash::FxHashMap;

use crate::ids::ConstructId;

/// Prior activity of the customer placing an order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerHistory {
    completed_orders: u32,
    redemptions: FxHashMap<ConstructId, u32>,
}

impl CustomerHistory {
    /// History for a customer with no completed orders and no redemptions.
    #[must_use]
    pub fn first_time() -> Self {
        Self::default()
    }

    /// Set the number of previously completed orders.
    #[must_use]
    pub fn with_completed_orders(mut self, completed_orders: u32) -> Self {
        self.completed_orders = completed_orders;
        self
    }

    /// Record how many times the customer has already redeemed a construct.
    #[must_use]
    pub fn with_redemptions(mut self, construct: ConstructId, count: u32) -> Self {
        self.redemptions.insert(construct, count);
        self
    }

    /// Number of previously completed orders.
    pub fn completed_orders(&self) -> u32 {
        self.completed_orders
    }

    /// Whether this would be the customer's first completed order.
    pub fn is_first_order(&self) -> bool {
        self.completed_orders == 0
    }

    /// How many times the customer has redeemed `construct`.
    pub fn redemptions(&self, construct: &ConstructId) -> u32 {
        self.redemptions.get(construct).copied().unwrap_or(0)
    }
}
