//! Pricing Engine
//!
//! Orchestrates combo resolution, coupon validation, promotion stacking and, on completion,
//! usage reservation.

use jiff::Timestamp;
use rustc_hash::FxHashSet;
use rusty_money::iso::Currency;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    catalog::CatalogError,
    combos::{Combo, resolve},
    config::EngineConfig,
    coupons::{Coupon, ValidationError},
    customers::CustomerHistory,
    ids::{ConstructId, CustomerUuid, OrderUuid},
    limits::UsageLimits,
    orders::{Order, OrderError, OrderSnapshot},
    pricing::{DiscountError, money},
    promotions::{
        Promotion,
        actions::{ActionBase, ActionOutcome},
    },
    receipt::{CouponOutcome, Discount, DiscountSource, DiscountTarget, PricedLine, PricedOrder},
    stacking::{Remainder, Selection, apply_selection, select},
    usage::{CasOutcome, CompletionRecord, ConcurrencyError, OrderClaim, UsageError, UsageStore},
};

/// Attempts made to hand back a reservation that is no longer needed.
const RELEASE_ATTEMPTS: u32 = 16;

/// Errors returned by the pricing engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    /// The order is malformed.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// A discount could not be computed.
    #[error(transparent)]
    Discount(#[from] DiscountError),

    /// The order references something the catalog does not know.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The usage store failed.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// A usage counter could not be updated.
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),
}

/// Caller-supplied facts that pricing depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingContext {
    /// Evaluation time for schedules.
    pub now: Timestamp,

    /// The ordering customer's history.
    pub history: CustomerHistory,
}

impl PricingContext {
    /// A context for a first-time customer.
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            history: CustomerHistory::first_time(),
        }
    }

    /// Set the customer history.
    #[must_use]
    pub fn with_history(mut self, history: CustomerHistory) -> Self {
        self.history = history;
        self
    }
}

/// Usage to record for a construct applied outside [`PricingEngine::complete_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageClaim {
    /// The applied construct.
    pub construct: ConstructId,

    /// Its limits.
    pub limits: UsageLimits,
}

impl UsageClaim {
    /// Claim usage of a promotion.
    pub fn promotion(promotion: &Promotion<'_>) -> Self {
        Self {
            construct: promotion.construct_id(),
            limits: *promotion.limits(),
        }
    }

    /// Claim usage of a coupon.
    pub fn coupon(coupon: &Coupon<'_>) -> Self {
        Self {
            construct: coupon.construct_id(),
            limits: *coupon.limits(),
        }
    }
}

/// Result of [`PricingEngine::record_usage`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageOutcome {
    /// Constructs whose usage was recorded.
    pub recorded: Vec<ConstructId>,

    /// Constructs refused because their limit was reached.
    pub rejected: Vec<ConstructId>,

    /// Whether the order had already been recorded, in which case nothing changed.
    pub replayed: bool,
}

/// Result of [`PricingEngine::complete_order`].
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<'a> {
    /// The order was priced and its usage recorded by this call.
    Completed {
        /// Final pricing.
        priced: PricedOrder<'a>,

        /// What was recorded.
        record: CompletionRecord,
    },

    /// The order had been completed before; counters were not touched.
    AlreadyCompleted(CompletionRecord),
}

impl Completion<'_> {
    /// The completion record, fresh or replayed.
    pub fn record(&self) -> &CompletionRecord {
        match self {
            Self::Completed { record, .. } | Self::AlreadyCompleted(record) => record,
        }
    }
}

enum Reservation {
    Reserved,
    Exhausted,
    Contended(ConcurrencyError),
}

/// Usage taken during a completion, handed back if the completion fails.
#[derive(Debug, Default)]
struct Holds {
    reserved: Vec<ConstructId>,
    redeemed: Vec<ConstructId>,
}

/// Constructs left out of a repricing.
#[derive(Debug, Default)]
struct Exclusions {
    all: FxHashSet<ConstructId>,

    /// The customer already redeemed these as often as allowed.
    per_user: FxHashSet<ConstructId>,
}

/// Prices orders and records construct usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingEngine {
    config: EngineConfig,
}

impl PricingEngine {
    /// Create an engine.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Returns the engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Price an order without side effects.
    ///
    /// Constructs priced in a different currency to the order are excluded. A rejected coupon
    /// is reported on the result and the order is priced without it.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if a discount cannot be computed.
    #[tracing::instrument(
        name = "pricing.price_order",
        skip_all,
        fields(order = %order.uuid(), customer = %order.customer())
    )]
    pub fn price_order<'a>(
        &self,
        order: &Order<'a>,
        promotions: &[Promotion<'a>],
        combos: &[Combo<'a>],
        coupon: Option<&Coupon<'a>>,
        context: &PricingContext,
    ) -> Result<PricedOrder<'a>, PricingError> {
        self.price_excluding(
            order,
            promotions,
            combos,
            coupon,
            context,
            &Exclusions::default(),
        )
    }

    /// Price an order and record usage of every applied construct.
    ///
    /// Constructs with a usage limit are reserved with a compare-and-swap, and constructs with
    /// a per-customer limit are redeemed against the store. A construct whose reservation or
    /// redemption fails is dropped and the order repriced until every applied limited
    /// construct holds one. Retrying with the same order id returns the recorded
    /// outcome without touching counters.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if pricing fails, the order is being completed
    /// concurrently, or the store fails. Reservations and redemptions taken before the failure
    /// are released.
    #[tracing::instrument(
        name = "pricing.complete_order",
        skip_all,
        fields(order = %order.uuid(), customer = %order.customer())
    )]
    pub async fn complete_order<'a, S>(
        &self,
        store: &S,
        order: &Order<'a>,
        promotions: &[Promotion<'a>],
        combos: &[Combo<'a>],
        coupon: Option<&Coupon<'a>>,
        context: &PricingContext,
    ) -> Result<Completion<'a>, PricingError>
    where
        S: UsageStore + ?Sized,
    {
        match store.claim_order(order.uuid()).await? {
            OrderClaim::AlreadyCompleted(record) => {
                debug!("order already completed; replaying recorded outcome");

                return Ok(Completion::AlreadyCompleted(record));
            }
            OrderClaim::InProgress => {
                return Err(UsageError::CompletionInProgress(order.uuid()).into());
            }
            OrderClaim::Claimed => {}
        }

        let mut holds = Holds::default();

        let result = self
            .reserve_and_price(
                store,
                order,
                promotions,
                combos,
                coupon,
                context,
                &mut holds,
            )
            .await;

        let (priced, record) = match result {
            Ok(completed) => completed,
            Err(err) => {
                self.rollback(store, order.uuid(), order.customer(), &holds)
                    .await;

                return Err(err);
            }
        };

        if let Err(err) = store.finish_order(record.clone()).await {
            self.rollback(store, order.uuid(), order.customer(), &holds)
                .await;

            return Err(err.into());
        }

        Ok(Completion::Completed { priced, record })
    }

    /// Record usage for constructs applied by a caller that priced the order itself.
    ///
    /// Idempotent by order id in the same way as [`Self::complete_order`].
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if the order is being recorded concurrently or the store
    /// fails. Reservations taken before the failure are released.
    #[tracing::instrument(
        name = "pricing.record_usage",
        skip_all,
        fields(order = %order, customer = %customer, claims = claims.len())
    )]
    pub async fn record_usage<S>(
        &self,
        store: &S,
        order: OrderUuid,
        customer: CustomerUuid,
        claims: &[UsageClaim],
    ) -> Result<UsageOutcome, PricingError>
    where
        S: UsageStore + ?Sized,
    {
        match store.claim_order(order).await? {
            OrderClaim::AlreadyCompleted(record) => {
                return Ok(UsageOutcome {
                    recorded: record.constructs,
                    rejected: Vec::new(),
                    replayed: true,
                });
            }
            OrderClaim::InProgress => {
                return Err(UsageError::CompletionInProgress(order).into());
            }
            OrderClaim::Claimed => {}
        }

        let mut outcome = UsageOutcome::default();
        let mut holds = Holds::default();

        let result = async {
            for claim in claims {
                if claim.limits.is_counted() {
                    match self
                        .reserve(store, &claim.construct, claim.limits.usage_limit)
                        .await?
                    {
                        Reservation::Reserved => holds.reserved.push(claim.construct.clone()),
                        Reservation::Exhausted => {
                            outcome.rejected.push(claim.construct.clone());
                            continue;
                        }
                        Reservation::Contended(err) => {
                            warn!(%err, "treating contended construct as exhausted");
                            outcome.rejected.push(claim.construct.clone());
                            continue;
                        }
                    }
                }

                if claim.limits.per_user_limit > 0 {
                    let redeemed = store
                        .record_redemption(&claim.construct, customer, claim.limits.per_user_limit)
                        .await?;

                    if !redeemed {
                        debug!(construct = %claim.construct, "per-customer limit reached");

                        if claim.limits.is_counted() {
                            self.release(store, &claim.construct).await?;
                            holds.reserved.retain(|held| *held != claim.construct);
                        }

                        outcome.rejected.push(claim.construct.clone());
                        continue;
                    }

                    holds.redeemed.push(claim.construct.clone());
                }

                outcome.recorded.push(claim.construct.clone());
            }

            store
                .finish_order(CompletionRecord {
                    order,
                    customer,
                    constructs: outcome.recorded.clone(),
                    total_minor: None,
                })
                .await?;

            Ok::<(), PricingError>(())
        }
        .await;

        if let Err(err) = result {
            self.rollback(store, order, customer, &holds).await;

            return Err(err);
        }

        Ok(outcome)
    }

    fn price_excluding<'a>(
        &self,
        order: &Order<'a>,
        promotions: &[Promotion<'a>],
        combos: &[Combo<'a>],
        coupon: Option<&Coupon<'a>>,
        context: &PricingContext,
        excluded: &Exclusions,
    ) -> Result<PricedOrder<'a>, PricingError> {
        let currency = order.currency();

        let combos: Vec<&Combo<'a>> = combos
            .iter()
            .filter(|combo| !excluded.all.contains(&combo.construct_id()))
            .filter(|combo| same_currency(&combo.construct_id(), [combo.currency()], currency))
            .collect();

        let resolution = resolve(order, &combos, context.now, self.config.combo_repetition)?;

        let snapshot = OrderSnapshot::new(order, resolution.subtotal_minor);

        let verdict = coupon.map(|coupon| {
            (
                coupon,
                check_coupon(coupon, &snapshot, context, excluded, currency),
            )
        });

        let (applied_coupon, coupon_outcome) = match verdict {
            None => (None, CouponOutcome::None),
            Some((coupon, Ok(()))) => (Some(coupon), CouponOutcome::Applied(coupon.construct_id())),
            Some((_, Err(err))) => {
                debug!(%err, "coupon rejected");

                (None, CouponOutcome::Rejected(err))
            }
        };

        let selection = if applied_coupon.is_some_and(Coupon::is_exclusive) {
            debug!("exclusive coupon suppresses promotions");

            Selection::default()
        } else {
            select(
                promotions.iter().filter(|promotion| {
                    same_currency(&promotion.construct_id(), promotion.currencies(), currency)
                }),
                &snapshot,
                context.now,
                &context.history,
                &excluded.all,
            )
        };

        let mut remainder = Remainder {
            merchandise: snapshot.subtotal_minor(),
            shipping: order.shipping_fee().to_minor_units(),
        };

        let stacked = apply_selection(&selection, &snapshot, &resolution.consumed, &mut remainder)?;

        let mut discounts: Vec<Discount<'a>> = resolution
            .matches
            .iter()
            .map(|matched| Discount {
                source: DiscountSource::Combo,
                construct: ConstructId::Combo(matched.combo),
                target: DiscountTarget::Merchandise,
                amount: money(matched.savings_minor, currency),
            })
            .collect();

        discounts.extend(stacked.into_iter().map(|stacked| Discount {
            source: DiscountSource::Promotion,
            construct: stacked.construct,
            target: target_of(stacked.outcome),
            amount: money(stacked.outcome.amount(), currency),
        }));

        if let Some(coupon) = applied_coupon {
            let outcome = coupon.apply(&ActionBase {
                remaining: remainder.merchandise,
                shipping: remainder.shipping,
                units: &[],
            })?;

            if outcome.amount() > 0 {
                remainder.apply(outcome);

                discounts.push(Discount {
                    source: DiscountSource::Coupon,
                    construct: coupon.construct_id(),
                    target: target_of(outcome),
                    amount: money(outcome.amount(), currency),
                });
            }
        }

        let lines = order
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let line_total = line.unit_minor().saturating_mul(i64::from(line.quantity()));

                PricedLine {
                    product: line.product(),
                    variant: line.variant(),
                    quantity: line.quantity(),
                    combo_units: resolution.consumed.get(idx).copied().unwrap_or(0),
                    unit_price: *line.unit_price(),
                    line_total: money(line_total, currency),
                    combo_savings: money(
                        resolution.line_savings.get(idx).copied().unwrap_or(0),
                        currency,
                    ),
                }
            });

        let total = remainder
            .merchandise
            .checked_add(remainder.shipping)
            .ok_or(DiscountError::Overflow)?;

        Ok(PricedOrder::new(
            lines,
            order.subtotal(),
            discounts,
            money(remainder.shipping, currency),
            money(total, currency),
            coupon_outcome,
        ))
    }

    #[expect(
        clippy::too_many_arguments,
        reason = "mirrors complete_order with the held usage threaded through"
    )]
    async fn reserve_and_price<'a, S>(
        &self,
        store: &S,
        order: &Order<'a>,
        promotions: &[Promotion<'a>],
        combos: &[Combo<'a>],
        coupon: Option<&Coupon<'a>>,
        context: &PricingContext,
        holds: &mut Holds,
    ) -> Result<(PricedOrder<'a>, CompletionRecord), PricingError>
    where
        S: UsageStore + ?Sized,
    {
        let limits_of = |construct: &ConstructId| -> Option<UsageLimits> {
            match construct {
                ConstructId::Promotion(uuid) => promotions
                    .iter()
                    .find(|promotion| promotion.uuid() == *uuid)
                    .map(|promotion| *promotion.limits()),
                ConstructId::Coupon(code) => coupon
                    .filter(|coupon| coupon.code() == code)
                    .map(|coupon| *coupon.limits()),
                ConstructId::Combo(_) => None,
            }
        };

        let mut excluded = Exclusions::default();

        loop {
            let priced =
                self.price_excluding(order, promotions, combos, coupon, context, &excluded)?;
            let applied = priced.applied_constructs();

            let stale: Vec<ConstructId> = holds
                .reserved
                .iter()
                .filter(|construct| !applied.contains(construct))
                .cloned()
                .collect();

            for construct in stale {
                self.release(store, &construct).await?;
                holds.reserved.retain(|held| *held != construct);
            }

            let stale: Vec<ConstructId> = holds
                .redeemed
                .iter()
                .filter(|construct| !applied.contains(construct))
                .cloned()
                .collect();

            for construct in stale {
                store
                    .release_redemption(&construct, order.customer())
                    .await?;
                holds.redeemed.retain(|held| *held != construct);
            }

            let mut lost = None;

            for construct in &applied {
                let Some(limits) = limits_of(construct) else {
                    continue;
                };

                if !limits.is_counted() || holds.reserved.contains(construct) {
                    continue;
                }

                match self.reserve(store, construct, limits.usage_limit).await? {
                    Reservation::Reserved => holds.reserved.push(construct.clone()),
                    Reservation::Exhausted => {
                        lost = Some(construct.clone());
                        break;
                    }
                    Reservation::Contended(err) => {
                        warn!(%err, "treating contended construct as exhausted");
                        lost = Some(construct.clone());
                        break;
                    }
                }
            }

            if let Some(construct) = lost {
                warn!(%construct, "usage limit reached during completion; repricing without it");
                excluded.all.insert(construct);
                continue;
            }

            for construct in &applied {
                let Some(limits) = limits_of(construct) else {
                    continue;
                };

                if limits.per_user_limit == 0 || holds.redeemed.contains(construct) {
                    continue;
                }

                if store
                    .record_redemption(construct, order.customer(), limits.per_user_limit)
                    .await?
                {
                    holds.redeemed.push(construct.clone());
                } else {
                    lost = Some(construct.clone());
                    break;
                }
            }

            if let Some(construct) = lost {
                warn!(%construct, "per-customer limit reached; repricing without it");
                excluded.per_user.insert(construct.clone());
                excluded.all.insert(construct);
                continue;
            }

            let recorded: Vec<ConstructId> = applied
                .into_iter()
                .filter(|construct| !matches!(construct, ConstructId::Combo(_)))
                .collect();

            let record = CompletionRecord {
                order: order.uuid(),
                customer: order.customer(),
                constructs: recorded,
                total_minor: Some(priced.total().to_minor_units()),
            };

            return Ok((priced, record));
        }
    }

    /// Increment a construct's usage count if it is below `limit`.
    async fn reserve<S>(
        &self,
        store: &S,
        construct: &ConstructId,
        limit: u32,
    ) -> Result<Reservation, UsageError>
    where
        S: UsageStore + ?Sized,
    {
        let mut current = store.usage_count(construct).await?;
        let mut attempts = 0;

        loop {
            if current >= limit {
                return Ok(Reservation::Exhausted);
            }

            attempts += 1;

            match store
                .compare_and_swap(construct, current, current + 1)
                .await?
            {
                CasOutcome::Swapped => return Ok(Reservation::Reserved),
                CasOutcome::Conflict { current: observed } => {
                    warn!(%construct, expected = current, observed, "lost usage race");

                    if attempts > self.config.cas_retries {
                        return Ok(Reservation::Contended(ConcurrencyError {
                            construct: construct.clone(),
                            attempts,
                        }));
                    }

                    current = observed;
                }
            }
        }
    }

    /// Give back one unit of usage.
    async fn release<S>(&self, store: &S, construct: &ConstructId) -> Result<(), PricingError>
    where
        S: UsageStore + ?Sized,
    {
        let mut current = store.usage_count(construct).await?;

        for _ in 0..RELEASE_ATTEMPTS {
            if current == 0 {
                return Ok(());
            }

            match store
                .compare_and_swap(construct, current, current - 1)
                .await?
            {
                CasOutcome::Swapped => return Ok(()),
                CasOutcome::Conflict { current: observed } => current = observed,
            }
        }

        Err(ConcurrencyError {
            construct: construct.clone(),
            attempts: RELEASE_ATTEMPTS,
        }
        .into())
    }

    async fn rollback<S>(&self, store: &S, order: OrderUuid, customer: CustomerUuid, holds: &Holds)
    where
        S: UsageStore + ?Sized,
    {
        for construct in &holds.redeemed {
            if let Err(err) = store.release_redemption(construct, customer).await {
                warn!(%construct, %err, "failed to release redemption");
            }
        }

        for construct in &holds.reserved {
            if let Err(err) = self.release(store, construct).await {
                warn!(%construct, %err, "failed to release usage reservation");
            }
        }

        if let Err(err) = store.abandon_order(order).await {
            warn!(%order, %err, "failed to abandon order claim");
        }
    }
}

fn target_of(outcome: ActionOutcome) -> DiscountTarget {
    match outcome {
        ActionOutcome::Merchandise(_) => DiscountTarget::Merchandise,
        ActionOutcome::Shipping(_) => DiscountTarget::Shipping,
    }
}

/// Whether every amount a construct carries is in the order currency. Logs and returns
/// `false` otherwise.
fn same_currency<'c>(
    construct: &ConstructId,
    currencies: impl IntoIterator<Item = &'c Currency>,
    order: &Currency,
) -> bool {
    for currency in currencies {
        if currency != order {
            warn!(
                %construct,
                construct_currency = currency.iso_alpha_code,
                order_currency = order.iso_alpha_code,
                "excluding construct priced in another currency"
            );

            return false;
        }
    }

    true
}

fn check_coupon(
    coupon: &Coupon<'_>,
    snapshot: &OrderSnapshot<'_, '_>,
    context: &PricingContext,
    excluded: &Exclusions,
    currency: &Currency,
) -> Result<(), ValidationError> {
    let construct = coupon.construct_id();

    if excluded.per_user.contains(&construct) {
        return Err(ValidationError::PerUserLimitExceeded(coupon.code().clone()));
    }

    if excluded.all.contains(&construct) {
        return Err(ValidationError::UsageExhausted(coupon.code().clone()));
    }

    if !same_currency(&construct, coupon.currencies(), currency) {
        return Err(ValidationError::CouponInactive(coupon.code().clone()));
    }

    coupon.validate(snapshot.subtotal_minor(), context.now, &context.history)
}

#[cfg(test)]
mod tests {
    use decimal_percentage::Percentage;
    use rust_decimal::Decimal;
    use rusty_money::{
        Money,
        iso::{GBP, USD},
    };
    use testresult::TestResult;

    use crate::{
        coupons::{CouponCode, CouponDiscount},
        ids::{ProductUuid, PromotionUuid},
        orders::LineItem,
        promotions::actions::Action,
        usage::{InMemoryUsageStore, MockUsageStore},
    };

    use super::*;

    fn context() -> TestResult<PricingContext> {
        Ok(PricingContext::new("2026-07-01T12:00:00Z".parse()?))
    }

    fn order(subtotal: i64, shipping: i64) -> TestResult<Order<'static>> {
        Ok(Order::with_items(
            OrderUuid::now_v7(),
            CustomerUuid::now_v7(),
            [LineItem::new(
                ProductUuid::now_v7(),
                1,
                Money::from_minor(subtotal, GBP),
            )],
            Money::from_minor(shipping, GBP),
            GBP,
        )?)
    }

    fn ten_percent_coupon(code: &str) -> TestResult<Coupon<'static>> {
        Ok(Coupon::new(
            CouponCode::new(code).ok_or("empty code")?,
            CouponDiscount::Percentage {
                percent: Percentage::from(Decimal::new(10, 2)),
                cap: None,
            },
        ))
    }

    #[test]
    fn coupon_applies_after_promotions() -> TestResult {
        let order = order(1_000, 0)?;
        let promotions = [Promotion::new(
            PromotionUuid::now_v7(),
            [],
            [Action::FixedOff(Money::from_minor(200, GBP))],
        )];
        let coupon = ten_percent_coupon("save10")?;

        let priced = PricingEngine::default().price_order(
            &order,
            &promotions,
            &[],
            Some(&coupon),
            &context()?,
        )?;

        // 10% of the 800 left after the promotion.
        assert_eq!(priced.discounts().len(), 2);
        assert_eq!(priced.total(), Money::from_minor(720, GBP));
        assert_eq!(
            priced.coupon(),
            &CouponOutcome::Applied(coupon.construct_id())
        );

        Ok(())
    }

    #[test]
    fn exclusive_coupon_suppresses_promotions() -> TestResult {
        let order = order(1_000, 0)?;
        let promotions = [Promotion::new(
            PromotionUuid::now_v7(),
            [],
            [Action::FixedOff(Money::from_minor(200, GBP))],
        )
        .with_stackable(true)];
        let coupon = ten_percent_coupon("vip")?.with_exclusive(true);

        let priced = PricingEngine::default().price_order(
            &order,
            &promotions,
            &[],
            Some(&coupon),
            &context()?,
        )?;

        assert_eq!(priced.discounts().len(), 1);
        assert_eq!(priced.total(), Money::from_minor(900, GBP));

        Ok(())
    }

    #[test]
    fn constructs_in_another_currency_are_excluded() -> TestResult {
        let order = order(1_000, 0)?;
        let promotions = [
            Promotion::new(
                PromotionUuid::now_v7(),
                [],
                [Action::FixedOff(Money::from_minor(200, USD))],
            )
            .with_stackable(true),
            Promotion::new(
                PromotionUuid::now_v7(),
                [],
                [Action::FixedOff(Money::from_minor(100, GBP))],
            )
            .with_stackable(true),
        ];

        let priced =
            PricingEngine::default().price_order(&order, &promotions, &[], None, &context()?)?;

        assert_eq!(priced.total_discount(), Money::from_minor(100, GBP));

        Ok(())
    }

    #[test]
    fn rejected_coupon_prices_without_it() -> TestResult {
        let order = order(400, 0)?;
        let coupon = ten_percent_coupon("big")?.with_min_order(Money::from_minor(500, GBP));

        let priced =
            PricingEngine::default().price_order(&order, &[], &[], Some(&coupon), &context()?)?;

        assert!(matches!(
            priced.coupon_rejection(),
            Some(ValidationError::MinOrderNotMet { .. })
        ));
        assert_eq!(priced.total_discount(), Money::from_minor(0, GBP));
        assert_eq!(priced.total(), Money::from_minor(400, GBP));

        Ok(())
    }

    #[tokio::test]
    async fn lost_cas_races_drop_the_coupon_and_reprice() -> TestResult {
        let order = order(1_000, 0)?;
        let coupon = ten_percent_coupon("rush")?.with_limits(UsageLimits::with_usage_limit(10, 0));

        let mut store = MockUsageStore::new();

        store
            .expect_claim_order()
            .once()
            .returning(|_| Ok(OrderClaim::Claimed));
        store.expect_usage_count().once().returning(|_| Ok(3));
        store
            .expect_compare_and_swap()
            .times(2)
            .returning(|_, expected, _| {
                Ok(CasOutcome::Conflict {
                    current: expected + 1,
                })
            });
        store.expect_record_redemption().never();
        store
            .expect_finish_order()
            .once()
            .withf(|record| record.constructs.is_empty())
            .returning(|_| Ok(()));
        store.expect_abandon_order().never();

        let completion = PricingEngine::default()
            .complete_order(&store, &order, &[], &[], Some(&coupon), &context()?)
            .await?;

        let Completion::Completed { priced, .. } = completion else {
            return Err("expected a fresh completion".into());
        };

        assert_eq!(
            priced.coupon_rejection(),
            Some(&ValidationError::UsageExhausted(coupon.code().clone()))
        );
        assert_eq!(priced.total(), Money::from_minor(1_000, GBP));

        Ok(())
    }

    #[tokio::test]
    async fn store_failure_releases_reservations() -> TestResult {
        let order = order(1_000, 0)?;
        let coupon = ten_percent_coupon("flaky")?.with_limits(UsageLimits {
            usage_limit: 5,
            per_user_limit: 1,
            usage_count: 0,
        });

        let mut store = MockUsageStore::new();

        store
            .expect_claim_order()
            .once()
            .returning(|_| Ok(OrderClaim::Claimed));
        let mut reads = 0;
        store.expect_usage_count().times(2).returning(move |_| {
            reads += 1;

            // The second read is the rollback seeing its own reservation.
            Ok(if reads == 1 { 0 } else { 1 })
        });
        store
            .expect_compare_and_swap()
            .once()
            .withf(|_, expected, new| *expected == 0 && *new == 1)
            .returning(|_, _, _| Ok(CasOutcome::Swapped));
        store
            .expect_compare_and_swap()
            .once()
            .withf(|_, expected, new| *expected == 1 && *new == 0)
            .returning(|_, _, _| Ok(CasOutcome::Swapped));
        store
            .expect_record_redemption()
            .once()
            .returning(|_, _, _| Err(UsageError::Unavailable("timeout".to_string())));
        store.expect_release_redemption().never();
        store.expect_finish_order().never();
        store
            .expect_abandon_order()
            .once()
            .returning(|_| Ok(()));

        let result = PricingEngine::default()
            .complete_order(&store, &order, &[], &[], Some(&coupon), &context()?)
            .await;

        assert_eq!(
            result,
            Err(PricingError::Usage(UsageError::Unavailable(
                "timeout".to_string()
            )))
        );

        Ok(())
    }

    #[tokio::test]
    async fn failed_finish_hands_back_redemptions() -> TestResult {
        let order = order(1_000, 0)?;
        let coupon = ten_percent_coupon("once")?.with_limits(UsageLimits::with_per_user_limit(1));
        let customer = order.customer();

        let mut store = MockUsageStore::new();

        store
            .expect_claim_order()
            .once()
            .returning(|_| Ok(OrderClaim::Claimed));
        store.expect_usage_count().never();
        store.expect_compare_and_swap().never();
        store
            .expect_record_redemption()
            .once()
            .withf(move |_, who, limit| *who == customer && *limit == 1)
            .returning(|_, _, _| Ok(true));
        store
            .expect_finish_order()
            .once()
            .returning(|_| Err(UsageError::Unavailable("disk full".to_string())));
        store
            .expect_release_redemption()
            .once()
            .withf(move |construct, who| {
                matches!(construct, ConstructId::Coupon(code) if code.as_str() == "ONCE")
                    && *who == customer
            })
            .returning(|_, _| Ok(()));
        store
            .expect_abandon_order()
            .once()
            .returning(|_| Ok(()));

        let result = PricingEngine::default()
            .complete_order(&store, &order, &[], &[], Some(&coupon), &context()?)
            .await;

        assert_eq!(
            result,
            Err(PricingError::Usage(UsageError::Unavailable(
                "disk full".to_string()
            )))
        );

        Ok(())
    }

    #[tokio::test]
    async fn customers_at_their_limit_complete_without_the_coupon() -> TestResult {
        let store = InMemoryUsageStore::new();
        let engine = PricingEngine::default();
        let order = order(1_000, 0)?;
        let coupon = ten_percent_coupon("once")?.with_limits(UsageLimits::with_per_user_limit(1));

        // the caller's history is stale; the store already holds a redemption
        assert!(
            store
                .record_redemption(&coupon.construct_id(), order.customer(), 1)
                .await?
        );

        let completion = engine
            .complete_order(&store, &order, &[], &[], Some(&coupon), &context()?)
            .await?;

        let Completion::Completed { priced, record } = completion else {
            return Err("expected a fresh completion".into());
        };

        assert_eq!(
            priced.coupon_rejection(),
            Some(&ValidationError::PerUserLimitExceeded(coupon.code().clone()))
        );
        assert!(record.constructs.is_empty());
        assert_eq!(store.redemptions(&coupon.construct_id(), order.customer())?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn record_usage_hands_back_reservations_past_the_per_customer_limit() -> TestResult {
        let store = InMemoryUsageStore::new();
        let engine = PricingEngine::default();
        let customer = CustomerUuid::now_v7();
        let coupon = ten_percent_coupon("once")?.with_limits(UsageLimits {
            usage_limit: 10,
            per_user_limit: 1,
            usage_count: 0,
        });
        let claims = [UsageClaim::coupon(&coupon)];

        let first = engine
            .record_usage(&store, OrderUuid::now_v7(), customer, &claims)
            .await?;
        let second = engine
            .record_usage(&store, OrderUuid::now_v7(), customer, &claims)
            .await?;

        assert_eq!(first.recorded, vec![coupon.construct_id()]);
        assert_eq!(second.rejected, vec![coupon.construct_id()]);
        assert_eq!(store.usage_count(&coupon.construct_id()).await?, 1);
        assert_eq!(store.redemptions(&coupon.construct_id(), customer)?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn record_usage_rejects_exhausted_claims() -> TestResult {
        let store = InMemoryUsageStore::new();
        let engine = PricingEngine::default();
        let order = OrderUuid::now_v7();
        let customer = CustomerUuid::now_v7();

        let open = Promotion::new(PromotionUuid::now_v7(), [], [Action::FreeShipping])
            .with_limits(UsageLimits::with_per_user_limit(2));
        let full = ten_percent_coupon("gone")?.with_limits(UsageLimits::with_usage_limit(1, 0));

        store.seed(full.construct_id(), 1)?;

        let claims = [UsageClaim::promotion(&open), UsageClaim::coupon(&full)];
        let outcome = engine.record_usage(&store, order, customer, &claims).await?;

        assert_eq!(outcome.recorded, vec![open.construct_id()]);
        assert_eq!(outcome.rejected, vec![full.construct_id()]);
        assert!(!outcome.replayed);
        assert_eq!(store.redemptions(&open.construct_id(), customer)?, 1);

        let replay = engine.record_usage(&store, order, customer, &claims).await?;

        assert!(replay.replayed);
        assert_eq!(replay.recorded, vec![open.construct_id()]);
        assert_eq!(store.redemptions(&open.construct_id(), customer)?, 1);

        Ok(())
    }
}
