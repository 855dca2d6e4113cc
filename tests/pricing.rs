//! Integration tests for order pricing: combos, promotion stacking and coupons.

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::GBP};
use testresult::TestResult;

use tally::{prelude::*, rules};

const NOW: &str = "2026-06-01T12:00:00Z";

const A: &str = "0192f0c1-0000-7000-8000-0000000000a1";
const B: &str = "0192f0c1-0000-7000-8000-0000000000a2";

fn order(lines: &[(&str, u32, i64)], shipping: i64) -> TestResult<Order<'static>> {
    let items = lines
        .iter()
        .map(|(product, quantity, price)| {
            Ok(LineItem::new(
                product.parse()?,
                *quantity,
                Money::from_minor(*price, GBP),
            ))
        })
        .collect::<Result<Vec<_>, uuid::Error>>()?;

    Ok(Order::with_items(
        OrderUuid::now_v7(),
        CustomerUuid::now_v7(),
        items,
        Money::from_minor(shipping, GBP),
        GBP,
    )?)
}

fn price(
    rules: &RuleSet<'static>,
    order: &Order<'static>,
    coupon: Option<&str>,
) -> TestResult<PricedOrder<'static>> {
    let coupon = match coupon {
        Some(code) => Some(rules.coupon(code).ok_or("coupon not loaded")?),
        None => None,
    };

    Ok(PricingEngine::default().price_order(
        order,
        rules.promotions(),
        rules.combos(),
        coupon,
        &PricingContext::new(NOW.parse::<Timestamp>()?),
    )?)
}

fn amounts(priced: &PricedOrder<'_>) -> Vec<i64> {
    priced
        .discounts()
        .iter()
        .map(|discount| discount.amount.to_minor_units())
        .collect()
}

#[test]
fn percentage_off_is_capped() -> TestResult {
    let rules = RuleSet::from_yaml(
        r"
promotions:
  - id: 0192f0c1-0000-7000-8000-000000000101
    actions:
      - type: percentage_off
        value: 20
        maxDiscount: 1.50
",
        GBP,
    )?;

    let priced = price(&rules, &order(&[(A, 1, 1_000)], 0)?, None)?;

    assert_eq!(amounts(&priced), vec![150]);
    assert_eq!(priced.total(), Money::from_minor(850, GBP));

    Ok(())
}

#[test]
fn stackable_promotions_apply_in_priority_order() -> TestResult {
    let rules = RuleSet::from_yaml(
        r"
promotions:
  - id: 0192f0c1-0000-7000-8000-000000000102
    stackable: true
    priority: 1
    actions:
      - type: fixed_off
        value: 0.50
  - id: 0192f0c1-0000-7000-8000-000000000101
    stackable: true
    priority: 2
    actions:
      - type: percentage_off
        value: 10
",
        GBP,
    )?;

    let priced = price(&rules, &order(&[(A, 1, 1_000)], 0)?, None)?;

    assert_eq!(amounts(&priced), vec![100, 50]);
    assert_eq!(priced.total(), Money::from_minor(850, GBP));

    let constructs: Vec<String> = priced
        .discounts()
        .iter()
        .map(|discount| discount.construct.to_string())
        .collect();

    assert_eq!(
        constructs,
        vec![
            "promotion:0192f0c1-0000-7000-8000-000000000101",
            "promotion:0192f0c1-0000-7000-8000-000000000102",
        ]
    );

    Ok(())
}

#[test]
fn only_one_non_stackable_promotion_applies() -> TestResult {
    let rules = RuleSet::from_yaml(
        r"
promotions:
  - id: 0192f0c1-0000-7000-8000-000000000101
    priority: 1
    actions:
      - type: fixed_off
        value: 1
  - id: 0192f0c1-0000-7000-8000-000000000102
    priority: 5
    actions:
      - type: fixed_off
        value: 2
",
        GBP,
    )?;

    let priced = price(&rules, &order(&[(A, 1, 1_000)], 0)?, None)?;

    assert_eq!(amounts(&priced), vec![200]);

    Ok(())
}

#[test]
fn coupon_below_minimum_order_is_rejected_without_discount() -> TestResult {
    let rules = RuleSet::from_yaml(
        r"
coupons:
  - code: MIN5
    discountType: fixed
    discountValue: 1
    minOrderAmount: 5
",
        GBP,
    )?;

    let priced = price(&rules, &order(&[(A, 1, 400)], 0)?, Some("min5"))?;

    assert_eq!(
        priced.coupon_rejection(),
        Some(&ValidationError::MinOrderNotMet {
            code: CouponCode::new("MIN5").ok_or("empty code")?,
            required: 500,
            subtotal: 400,
        })
    );
    assert!(priced.discounts().is_empty());
    assert_eq!(priced.total(), Money::from_minor(400, GBP));

    Ok(())
}

#[test]
fn partial_combo_match_keeps_standard_prices() -> TestResult {
    let rules = RuleSet::from_yaml(
        &format!(
            r"
combos:
  - id: 0192f0c1-0000-7000-8000-000000000201
    type: bundle
    items:
      - productId: {A}
        quantity: 1
      - productId: {B}
        quantity: 2
    originalPrice: 30
    comboPrice: 25
"
        ),
        GBP,
    )?;

    let priced = price(&rules, &order(&[(A, 1, 1_000), (B, 1, 1_000)], 0)?, None)?;

    assert!(priced.discounts().is_empty());
    assert_eq!(priced.total(), Money::from_minor(2_000, GBP));

    let priced = price(&rules, &order(&[(A, 1, 1_000), (B, 2, 1_000)], 0)?, None)?;

    assert_eq!(amounts(&priced), vec![500]);
    assert_eq!(priced.total(), Money::from_minor(2_500, GBP));

    Ok(())
}

#[test]
fn discounts_never_exceed_what_is_payable() -> TestResult {
    let rules = RuleSet::from_yaml(
        r"
promotions:
  - id: 0192f0c1-0000-7000-8000-000000000101
    stackable: true
    actions:
      - type: fixed_off
        value: 50
      - type: free_shipping
  - id: 0192f0c1-0000-7000-8000-000000000102
    stackable: true
    actions:
      - type: percentage_off
        value: 100
coupons:
  - code: MORE
    discountType: fixed
    discountValue: 20
",
        GBP,
    )?;

    let order = order(&[(A, 2, 600)], 299)?;
    let priced = price(&rules, &order, Some("MORE"))?;

    assert_eq!(amounts(&priced), vec![1_200, 299]);
    assert_eq!(priced.total(), Money::from_minor(0, GBP));
    assert!(priced.total_discount().to_minor_units() <= order.subtotal_minor() + 299);

    Ok(())
}

#[test]
fn storefront_fixture_prices_basket() -> TestResult {
    let order = rules::load_order_definition(
        concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/orders/basket.yml").as_ref(),
    )?
    .into_order()?;

    let rules = RuleSet::load(
        concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/rules/storefront.yml").as_ref(),
        order.currency(),
    )?;

    let priced = price(&rules, &order, None)?;

    // socks combo, clearance (capped), 10% over £50, £5 off, free shipping
    assert_eq!(amounts(&priced), vec![200, 1_000, 500, 500, 399]);
    assert_eq!(priced.subtotal(), Money::from_minor(6_200, GBP));
    assert_eq!(priced.shipping_fee(), Money::from_minor(0, GBP));
    assert_eq!(priced.total(), Money::from_minor(4_000, GBP));

    let report = priced.to_report();

    assert_eq!(report.total, Decimal::new(4_000, 2));
    assert_eq!(report.total_discount, Decimal::new(2_599, 2));
    assert_eq!(report.lines.get(1).map(|line| line.combo_units), Some(3));

    Ok(())
}

#[test]
fn storefront_coupons() -> TestResult {
    let order = rules::load_order_definition(
        concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/orders/basket.yml").as_ref(),
    )?
    .into_order()?;

    let rules = RuleSet::load(
        concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/rules/storefront.yml").as_ref(),
        order.currency(),
    )?;

    let priced = price(&rules, &order, Some("save5"))?;

    assert_eq!(priced.total(), Money::from_minor(3_500, GBP));
    assert!(matches!(priced.coupon(), CouponOutcome::Applied(_)));

    let priced = price(&rules, &order, Some("VIP"))?;

    // exclusive: only the combo survives ahead of the coupon
    assert_eq!(amounts(&priced), vec![200, 1_500]);
    assert_eq!(priced.total(), Money::from_minor(4_899, GBP));

    let priced = price(&rules, &order, Some("retired"))?;

    assert!(matches!(
        priced.coupon_rejection(),
        Some(ValidationError::CouponInactive(_))
    ));
    assert_eq!(priced.total(), Money::from_minor(4_000, GBP));

    let priced = PricingEngine::default().price_order(
        &order,
        rules.promotions(),
        rules.combos(),
        rules.coupon("welcome10"),
        &PricingContext::new(NOW.parse()?)
            .with_history(CustomerHistory::first_time().with_completed_orders(2)),
    )?;

    assert!(matches!(
        priced.coupon_rejection(),
        Some(ValidationError::NotFirstOrder(_))
    ));

    Ok(())
}

#[test]
fn storefront_small_order() -> TestResult {
    let order = rules::load_order_definition(
        concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/orders/small.json").as_ref(),
    )?
    .into_order()?;

    let rules = RuleSet::load(
        concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/rules/storefront.yml").as_ref(),
        order.currency(),
    )?;

    let priced = price(&rules, &order, Some("SAVE5"))?;

    assert_eq!(amounts(&priced), vec![300, 500]);
    assert_eq!(priced.total(), Money::from_minor(1_099, GBP));
    assert!(matches!(
        priced.coupon_rejection(),
        Some(ValidationError::MinOrderNotMet {
            required: 4_000,
            subtotal: 1_500,
            ..
        })
    ));

    Ok(())
}
