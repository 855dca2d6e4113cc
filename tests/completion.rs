//! Integration tests for order completion against a shared usage store.

use std::sync::Arc;

use jiff::Timestamp;
use rusty_money::{Money, iso::GBP};
use testresult::TestResult;

use tally::prelude::*;

const NOW: &str = "2026-06-01T12:00:00Z";

const SHIRT: &str = "0192f0c1-0000-7000-8000-0000000000a1";

const RULES: &str = r"
promotions:
  - id: 0192f0c1-0000-7000-8000-000000000301
    name: Launch week, first 3 orders
    priority: 10
    usageLimit: 3
    actions:
      - type: percentage_off
        value: 30
  - id: 0192f0c1-0000-7000-8000-000000000302
    name: Standing 10% off
    priority: 1
    actions:
      - type: percentage_off
        value: 10
coupons:
  - code: FIVE
    discountType: fixed
    discountValue: 1
    usageLimit: 5
  - code: ONCE
    discountType: fixed
    discountValue: 2
    perUserLimit: 1
";

fn order_for(customer: CustomerUuid) -> TestResult<Order<'static>> {
    Ok(Order::with_items(
        OrderUuid::now_v7(),
        customer,
        [LineItem::new(SHIRT.parse()?, 1, Money::from_minor(1_000, GBP))],
        Money::from_minor(0, GBP),
        GBP,
    )?)
}

fn context() -> TestResult<PricingContext> {
    Ok(PricingContext::new(NOW.parse::<Timestamp>()?))
}

fn coupon_id(code: &str) -> TestResult<ConstructId> {
    Ok(ConstructId::Coupon(CouponCode::new(code).ok_or("empty code")?))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_never_exceed_the_usage_limit() -> TestResult {
    let rules = Arc::new(RuleSet::from_yaml(RULES, GBP)?);
    let store = Arc::new(InMemoryUsageStore::new());
    let engine = PricingEngine::new(EngineConfig::default());

    let mut handles = Vec::new();

    for _ in 0..32 {
        let rules = Arc::clone(&rules);
        let store = Arc::clone(&store);
        let order = order_for(CustomerUuid::now_v7())?;
        let context = context()?;

        handles.push(tokio::spawn(async move {
            let coupon = rules.coupon("FIVE");

            engine
                .complete_order(
                    store.as_ref(),
                    &order,
                    rules.promotions(),
                    rules.combos(),
                    coupon,
                    &context,
                )
                .await
                .map(|completion| completion.record().clone())
        }));
    }

    let coupon = coupon_id("FIVE")?;
    let launch = ConstructId::Promotion("0192f0c1-0000-7000-8000-000000000301".parse()?);

    let mut coupon_redemptions = 0;
    let mut launch_redemptions = 0;

    for handle in handles {
        let record = handle.await??;

        coupon_redemptions += usize::from(record.constructs.contains(&coupon));
        launch_redemptions += usize::from(record.constructs.contains(&launch));
    }

    let coupon_count = store.usage_count(&coupon).await?;
    let launch_count = store.usage_count(&launch).await?;

    assert!(coupon_count <= 5, "coupon used {coupon_count} times");
    assert!(launch_count <= 3, "promotion used {launch_count} times");
    assert_eq!(usize::try_from(coupon_count)?, coupon_redemptions);
    assert_eq!(usize::try_from(launch_count)?, launch_redemptions);

    Ok(())
}

#[tokio::test]
async fn retried_completion_does_not_count_twice() -> TestResult {
    let rules = RuleSet::from_yaml(RULES, GBP)?;
    let store = InMemoryUsageStore::new();
    let engine = PricingEngine::default();
    let order = order_for(CustomerUuid::now_v7())?;
    let context = context()?;

    let first = engine
        .complete_order(
            &store,
            &order,
            rules.promotions(),
            rules.combos(),
            rules.coupon("five"),
            &context,
        )
        .await?;

    assert!(matches!(first, Completion::Completed { .. }));

    let retry = engine
        .complete_order(
            &store,
            &order,
            rules.promotions(),
            rules.combos(),
            rules.coupon("five"),
            &context,
        )
        .await?;

    assert!(matches!(retry, Completion::AlreadyCompleted(_)));
    assert_eq!(retry.record(), first.record());
    assert_eq!(store.usage_count(&coupon_id("FIVE")?).await?, 1);
    assert_eq!(first.record().total_minor, Some(600));

    Ok(())
}

#[tokio::test]
async fn exhausted_promotion_falls_back_to_the_next_non_stackable() -> TestResult {
    let rules = RuleSet::from_yaml(RULES, GBP)?;
    let store = InMemoryUsageStore::new();
    let engine = PricingEngine::default();
    let launch = ConstructId::Promotion("0192f0c1-0000-7000-8000-000000000301".parse()?);

    // the rule definitions still say 0 uses; the store knows better
    store.seed(launch.clone(), 3)?;

    let order = order_for(CustomerUuid::now_v7())?;

    let completion = engine
        .complete_order(
            &store,
            &order,
            rules.promotions(),
            rules.combos(),
            None,
            &context()?,
        )
        .await?;

    let Completion::Completed { priced, record } = completion else {
        return Err("expected a fresh completion".into());
    };

    assert_eq!(
        record.constructs,
        vec![ConstructId::Promotion(
            "0192f0c1-0000-7000-8000-000000000302".parse()?
        )]
    );
    assert_eq!(priced.total(), Money::from_minor(900, GBP));
    assert_eq!(store.usage_count(&launch).await?, 3);

    Ok(())
}

#[tokio::test]
async fn per_user_limits_follow_recorded_redemptions() -> TestResult {
    let rules = RuleSet::from_yaml(RULES, GBP)?;
    let store = InMemoryUsageStore::new();
    let engine = PricingEngine::default();
    let customer = CustomerUuid::now_v7();
    let once = coupon_id("ONCE")?;

    engine
        .complete_order(
            &store,
            &order_for(customer)?,
            rules.promotions(),
            rules.combos(),
            rules.coupon("ONCE"),
            &context()?,
        )
        .await?;

    let redemptions = store.redemptions(&once, customer)?;

    assert_eq!(redemptions, 1);

    let history = CustomerHistory::first_time()
        .with_completed_orders(1)
        .with_redemptions(once, redemptions);

    let priced = engine.price_order(
        &order_for(customer)?,
        rules.promotions(),
        rules.combos(),
        rules.coupon("ONCE"),
        &context()?.with_history(history),
    )?;

    assert!(matches!(
        priced.coupon_rejection(),
        Some(ValidationError::PerUserLimitExceeded(_))
    ));

    Ok(())
}

#[tokio::test]
async fn stale_history_cannot_redeem_past_the_per_customer_limit() -> TestResult {
    let rules = RuleSet::from_yaml(RULES, GBP)?;
    let store = InMemoryUsageStore::new();
    let engine = PricingEngine::default();
    let customer = CustomerUuid::now_v7();
    let once = coupon_id("ONCE")?;

    let mut records = Vec::new();

    // both orders arrive with a first-time history
    for _ in 0..2 {
        let completion = engine
            .complete_order(
                &store,
                &order_for(customer)?,
                rules.promotions(),
                rules.combos(),
                rules.coupon("ONCE"),
                &context()?,
            )
            .await?;

        records.push(completion.record().clone());
    }

    assert_eq!(store.redemptions(&once, customer)?, 1);

    let [first, second] = records.as_slice() else {
        return Err("expected two completions".into());
    };

    assert!(first.constructs.contains(&once));
    assert!(!second.constructs.contains(&once));
    assert_eq!(first.total_minor, Some(500));
    assert_eq!(second.total_minor, Some(700));

    Ok(())
}
