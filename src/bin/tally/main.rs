//! Tally CLI

use clap::Parser;

mod cli;
mod logging;

fn main() -> anyhow::Result<()> {
    let _env = dotenvy::dotenv();

    let cli = cli::Cli::parse();

    logging::init_subscriber(&cli.logging)?;

    cli.run()
}
