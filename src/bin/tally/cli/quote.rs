use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use jiff::Timestamp;
use tally::{
    config::EngineConfig,
    customers::CustomerHistory,
    engine::{PricingContext, PricingEngine},
    rules::{RuleSet, load_order_definition},
};
use tracing::info;

#[derive(Debug, Args)]
pub(crate) struct QuoteArgs {
    /// Rules file (.json, .yml or .yaml)
    #[arg(long, env = "TALLY_RULES")]
    rules: PathBuf,

    /// Order file (.json, .yml or .yaml)
    #[arg(long)]
    order: PathBuf,

    /// Coupon code entered by the customer
    #[arg(long)]
    coupon: Option<String>,

    /// Evaluation time (RFC 3339); defaults to now
    #[arg(long)]
    now: Option<Timestamp>,

    /// Engine configuration file (YAML)
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Orders the customer has completed before this one
    #[arg(long, default_value_t = 0)]
    completed_orders: u32,
}

pub(crate) fn run(args: QuoteArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let order = load_order_definition(&args.order)?
        .into_order()
        .with_context(|| format!("failed to build order from {}", args.order.display()))?;

    let rules = RuleSet::load(&args.rules, order.currency())?;

    let coupon = match args.coupon.as_deref() {
        Some(code) => Some(
            rules
                .coupon(code)
                .with_context(|| format!("unknown coupon code {code:?}"))?,
        ),
        None => None,
    };

    let context = PricingContext::new(args.now.unwrap_or_else(Timestamp::now)).with_history(
        CustomerHistory::first_time().with_completed_orders(args.completed_orders),
    );

    let priced = PricingEngine::new(config).price_order(
        &order,
        rules.promotions(),
        rules.combos(),
        coupon,
        &context,
    )?;

    info!(total = %priced.total(), discounts = priced.discounts().len(), "priced order");

    println!("{}", serde_json::to_string_pretty(&priced.to_report())?);

    Ok(())
}
