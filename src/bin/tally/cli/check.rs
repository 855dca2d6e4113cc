use std::path::PathBuf;

use clap::Args;
use tally::rules::{RuleSet, currency_for};

#[derive(Debug, Args)]
pub(crate) struct CheckArgs {
    /// Rules file (.json, .yml or .yaml)
    #[arg(long, env = "TALLY_RULES")]
    rules: PathBuf,

    /// ISO currency the rules are priced in
    #[arg(long, default_value = "GBP")]
    currency: String,
}

pub(crate) fn run(args: CheckArgs) -> anyhow::Result<()> {
    let rules = RuleSet::load(&args.rules, currency_for(&args.currency)?)?;

    println!(
        "promotions: {}, coupons: {}, combos: {}",
        rules.promotions().len(),
        rules.coupons().len(),
        rules.combos().len()
    );

    for rejection in rules.rejections() {
        println!("excluded {}: {}", rejection.record, rejection.error);
    }

    Ok(())
}
