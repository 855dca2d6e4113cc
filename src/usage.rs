//! Usage Store
//!
//! Redemption counters and completion records kept by the rule store. The engine only talks
//! to them through [`UsageStore`].

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ids::{ConstructId, CustomerUuid, OrderUuid};

/// Errors raised by a usage store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    /// The store's lock was poisoned by a panicking writer.
    #[error("usage store lock poisoned: {0}")]
    Poisoned(String),

    /// Another completion of the same order is running.
    #[error("order {0} is already being completed")]
    CompletionInProgress(OrderUuid),

    /// The order was never claimed, so it cannot be finished.
    #[error("order {0} has not been claimed")]
    NotClaimed(OrderUuid),

    /// The backing store failed.
    #[error("usage store unavailable: {0}")]
    Unavailable(String),
}

/// A usage increment lost its compare-and-swap race too many times.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("lost {attempts} usage races for {construct}")]
pub struct ConcurrencyError {
    /// The contended construct.
    pub construct: ConstructId,

    /// Compare-and-swap attempts made.
    pub attempts: u32,
}

/// Result of a compare-and-swap on a usage counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The counter held the expected value and now holds the new one.
    Swapped,

    /// The counter held a different value, returned here.
    Conflict {
        /// Value observed by the store.
        current: u32,
    },
}

/// What a completed order recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    /// Order the record belongs to.
    pub order: OrderUuid,

    /// Customer who placed the order.
    pub customer: CustomerUuid,

    /// Constructs whose usage was recorded.
    pub constructs: Vec<ConstructId>,

    /// Amount payable in minor units, when the order was priced by the engine.
    pub total_minor: Option<i64>,
}

/// Result of claiming an order for completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderClaim {
    /// This caller owns the completion.
    Claimed,

    /// The order was completed before; nothing may be recorded again.
    AlreadyCompleted(CompletionRecord),

    /// Another caller is completing the order right now.
    InProgress,
}

/// Persistent usage counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Current global usage count of a construct.
    async fn usage_count(&self, construct: &ConstructId) -> Result<u32, UsageError>;

    /// Set the usage count to `new` only if it currently equals `expected`.
    async fn compare_and_swap(
        &self,
        construct: &ConstructId,
        expected: u32,
        new: u32,
    ) -> Result<CasOutcome, UsageError>;

    /// Record one redemption by a customer if they have fewer than `limit`.
    ///
    /// A `limit` of zero means unlimited. Returns whether the redemption was recorded.
    async fn record_redemption(
        &self,
        construct: &ConstructId,
        customer: CustomerUuid,
        limit: u32,
    ) -> Result<bool, UsageError>;

    /// Give back one redemption recorded for a customer.
    async fn release_redemption(
        &self,
        construct: &ConstructId,
        customer: CustomerUuid,
    ) -> Result<(), UsageError>;

    /// Take ownership of an order's completion.
    async fn claim_order(&self, order: OrderUuid) -> Result<OrderClaim, UsageError>;

    /// Store the completion record and release the claim.
    async fn finish_order(&self, record: CompletionRecord) -> Result<(), UsageError>;

    /// Release a claim without recording anything.
    async fn abandon_order(&self, order: OrderUuid) -> Result<(), UsageError>;
}

#[derive(Debug, Clone)]
enum OrderState {
    InProgress,
    Completed(CompletionRecord),
}

#[derive(Debug, Default)]
struct UsageState {
    counts: FxHashMap<ConstructId, u32>,
    redemptions: FxHashMap<(ConstructId, CustomerUuid), u32>,
    orders: FxHashMap<OrderUuid, OrderState>,
}

/// Mutex-guarded, process-local [`UsageStore`].
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    state: Mutex<UsageState>,
}

impl InMemoryUsageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a construct's usage count, e.g. from rule definitions.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::Poisoned`] if the lock is poisoned.
    pub fn seed(&self, construct: ConstructId, count: u32) -> Result<(), UsageError> {
        self.lock()?.counts.insert(construct, count);

        Ok(())
    }

    /// A customer's redemptions of a construct.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::Poisoned`] if the lock is poisoned.
    pub fn redemptions(
        &self,
        construct: &ConstructId,
        customer: CustomerUuid,
    ) -> Result<u32, UsageError> {
        Ok(self
            .lock()?
            .redemptions
            .get(&(construct.clone(), customer))
            .copied()
            .unwrap_or(0))
    }

    /// The completion record for an order, if it has been completed.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::Poisoned`] if the lock is poisoned.
    pub fn completion(&self, order: OrderUuid) -> Result<Option<CompletionRecord>, UsageError> {
        Ok(match self.lock()?.orders.get(&order) {
            Some(OrderState::Completed(record)) => Some(record.clone()),
            Some(OrderState::InProgress) | None => None,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, UsageState>, UsageError> {
        self.state
            .lock()
            .map_err(|err| UsageError::Poisoned(err.to_string()))
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn usage_count(&self, construct: &ConstructId) -> Result<u32, UsageError> {
        Ok(self.lock()?.counts.get(construct).copied().unwrap_or(0))
    }

    async fn compare_and_swap(
        &self,
        construct: &ConstructId,
        expected: u32,
        new: u32,
    ) -> Result<CasOutcome, UsageError> {
        let mut state = self.lock()?;
        let count = state.counts.entry(construct.clone()).or_insert(0);

        if *count != expected {
            return Ok(CasOutcome::Conflict { current: *count });
        }

        *count = new;

        Ok(CasOutcome::Swapped)
    }

    async fn record_redemption(
        &self,
        construct: &ConstructId,
        customer: CustomerUuid,
        limit: u32,
    ) -> Result<bool, UsageError> {
        let mut state = self.lock()?;
        let count = state
            .redemptions
            .entry((construct.clone(), customer))
            .or_insert(0);

        if limit > 0 && *count >= limit {
            return Ok(false);
        }

        *count = count.saturating_add(1);

        Ok(true)
    }

    async fn release_redemption(
        &self,
        construct: &ConstructId,
        customer: CustomerUuid,
    ) -> Result<(), UsageError> {
        let mut state = self.lock()?;

        if let Some(count) = state.redemptions.get_mut(&(construct.clone(), customer)) {
            *count = count.saturating_sub(1);
        }

        Ok(())
    }

    async fn claim_order(&self, order: OrderUuid) -> Result<OrderClaim, UsageError> {
        let mut state = self.lock()?;

        match state.orders.get(&order) {
            Some(OrderState::Completed(record)) => Ok(OrderClaim::AlreadyCompleted(record.clone())),
            Some(OrderState::InProgress) => Ok(OrderClaim::InProgress),
            None => {
                state.orders.insert(order, OrderState::InProgress);

                Ok(OrderClaim::Claimed)
            }
        }
    }

    async fn finish_order(&self, record: CompletionRecord) -> Result<(), UsageError> {
        let mut state = self.lock()?;

        match state.orders.get(&record.order) {
            Some(OrderState::InProgress) => {
                state
                    .orders
                    .insert(record.order, OrderState::Completed(record));

                Ok(())
            }
            Some(OrderState::Completed(_)) | None => Err(UsageError::NotClaimed(record.order)),
        }
    }

    async fn abandon_order(&self, order: OrderUuid) -> Result<(), UsageError> {
        let mut state = self.lock()?;

        if matches!(state.orders.get(&order), Some(OrderState::InProgress)) {
            state.orders.remove(&order);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use crate::{coupons::CouponCode, ids::PromotionUuid};

    use super::*;

    fn coupon(code: &str) -> TestResult<ConstructId> {
        Ok(ConstructId::Coupon(CouponCode::new(code).ok_or("empty code")?))
    }

    #[tokio::test]
    async fn compare_and_swap_only_applies_on_expected_value() -> TestResult {
        let store = InMemoryUsageStore::new();
        let construct = coupon("save10")?;

        store.seed(construct.clone(), 3)?;

        assert_eq!(
            store.compare_and_swap(&construct, 2, 3).await?,
            CasOutcome::Conflict { current: 3 }
        );
        assert_eq!(
            store.compare_and_swap(&construct, 3, 4).await?,
            CasOutcome::Swapped
        );
        assert_eq!(store.usage_count(&construct).await?, 4);

        Ok(())
    }

    #[tokio::test]
    async fn unseen_constructs_start_at_zero() -> TestResult {
        let store = InMemoryUsageStore::new();
        let construct = ConstructId::Promotion(PromotionUuid::now_v7());

        assert_eq!(store.usage_count(&construct).await?, 0);
        assert_eq!(
            store.compare_and_swap(&construct, 0, 1).await?,
            CasOutcome::Swapped
        );

        Ok(())
    }

    #[tokio::test]
    async fn redemptions_are_counted_per_customer() -> TestResult {
        let store = InMemoryUsageStore::new();
        let construct = coupon("welcome")?;
        let alice = CustomerUuid::now_v7();
        let bob = CustomerUuid::now_v7();

        assert!(store.record_redemption(&construct, alice, 0).await?);
        assert!(store.record_redemption(&construct, alice, 0).await?);
        assert!(store.record_redemption(&construct, bob, 0).await?);

        assert_eq!(store.redemptions(&construct, alice)?, 2);
        assert_eq!(store.redemptions(&construct, bob)?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn redemptions_stop_at_the_per_customer_limit() -> TestResult {
        let store = InMemoryUsageStore::new();
        let construct = coupon("once")?;
        let customer = CustomerUuid::now_v7();

        assert!(store.record_redemption(&construct, customer, 1).await?);
        assert!(!store.record_redemption(&construct, customer, 1).await?);
        assert_eq!(store.redemptions(&construct, customer)?, 1);

        store.release_redemption(&construct, customer).await?;
        store.release_redemption(&construct, customer).await?;

        assert_eq!(store.redemptions(&construct, customer)?, 0);
        assert!(store.record_redemption(&construct, customer, 1).await?);

        Ok(())
    }

    #[tokio::test]
    async fn order_claims_are_exclusive_and_replayable() -> TestResult {
        let store = InMemoryUsageStore::new();
        let order = OrderUuid::now_v7();
        let record = CompletionRecord {
            order,
            customer: CustomerUuid::now_v7(),
            constructs: vec![coupon("save10")?],
            total_minor: Some(900),
        };

        assert_eq!(store.claim_order(order).await?, OrderClaim::Claimed);
        assert_eq!(store.claim_order(order).await?, OrderClaim::InProgress);

        store.finish_order(record.clone()).await?;

        assert_eq!(
            store.claim_order(order).await?,
            OrderClaim::AlreadyCompleted(record.clone())
        );
        assert_eq!(store.completion(order)?, Some(record.clone()));

        // Finishing twice is refused.
        assert_eq!(
            store.finish_order(record).await,
            Err(UsageError::NotClaimed(order))
        );

        Ok(())
    }

    #[tokio::test]
    async fn abandoned_claims_can_be_retaken() -> TestResult {
        let store = InMemoryUsageStore::new();
        let order = OrderUuid::now_v7();

        assert_eq!(store.claim_order(order).await?, OrderClaim::Claimed);

        store.abandon_order(order).await?;

        assert_eq!(store.claim_order(order).await?, OrderClaim::Claimed);

        Ok(())
    }
}
