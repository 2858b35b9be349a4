//! Ledgerlock CLI - concurrency-safe transfers in your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ledgerlock_core::Strategy;
use rust_decimal::Decimal;

mod commands;
mod logging;
mod output;

use commands::{balances, race, seed, transfer};

/// Ledgerlock - move money between accounts without losing updates
#[derive(Parser)]
#[command(name = "ledgerlock", version, about, long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create accounts with an opening balance
    Seed {
        /// Accounts as ID=AMOUNT, e.g. A=100 B=0
        #[arg(required = true)]
        accounts: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move funds between two accounts
    Transfer {
        /// Account to debit
        #[arg(long)]
        from: String,
        /// Account to credit
        #[arg(long)]
        to: String,
        /// Amount to move, must be positive
        #[arg(long)]
        amount: Decimal,
        /// unsafe, optimistic, optimistic-with-retry or pessimistic
        #[arg(long, default_value = "optimistic-with-retry")]
        strategy: Strategy,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show all accounts and the total balance
    Balances {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Race two transfers out of one account on a scratch store
    Race {
        /// Strategy both transfers use
        #[arg(long, default_value = "optimistic-with-retry")]
        strategy: Strategy,
        /// Amount each transfer moves
        #[arg(long, default_value = "80")]
        amount: Decimal,
        /// Opening balance of the shared source account
        #[arg(long, default_value = "100")]
        seed: Decimal,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Seed { accounts, json } => seed::run(&accounts, json).await,
        Commands::Transfer { from, to, amount, strategy, json } => {
            transfer::run(&from, &to, amount, strategy, json).await
        }
        Commands::Balances { json } => balances::run(json).await,
        Commands::Race { strategy, amount, seed, json } => race::run(strategy, amount, seed, json).await,
    }
}
