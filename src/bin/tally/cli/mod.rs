use clap::{Parser, Subcommand};

use crate::logging::LoggingConfig;

mod check;
mod quote;

#[derive(Debug, Parser)]
#[command(name = "tally", about = "Tally order pricing CLI", long_about = None)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) logging: LoggingConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Price an order against a rule set and print the result as JSON
    Quote(quote::QuoteArgs),

    /// Load a rule set and list the records it excludes
    Check(check::CheckArgs),
}

impl Cli {
    pub(crate) fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Quote(args) => quote::run(args),
            Commands::Check(args) => check::run(args),
        }
    }
}
