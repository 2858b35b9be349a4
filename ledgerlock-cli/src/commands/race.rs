//! Race command - two concurrent transfers out of one account
//!
//! Seeds A with `seed`, B and C with zero on a scratch in-memory store, then
//! starts A->B and A->C for `amount` each at the same moment.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use ledgerlock_core::config::Config;
use ledgerlock_core::{Account, LedgerContext, OperationResult, Strategy, TransferReceipt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Barrier;

use super::get_data_dir;
use crate::output;

/// Unsafe writes wait this long when no delay is configured, so both
/// racers read before either writes
const UNSAFE_RACE_DELAY: Duration = Duration::from_millis(50);

const SOURCE: &str = "A";
const TARGETS: [&str; 2] = ["B", "C"];

#[derive(Serialize)]
struct RaceOutput {
    strategy: Strategy,
    transfers: Vec<OperationResult<TransferReceipt>>,
    accounts: Vec<Account>,
    total: Decimal,
    conserved: bool,
    non_negative: bool,
}

pub async fn run(strategy: Strategy, amount: Decimal, seed: Decimal, json: bool) -> Result<()> {
    let mut config = Config::load(&get_data_dir()?)?;
    if !strategy.is_safe() && config.unsafe_write_delay_ms == 0 {
        config.unsafe_write_delay_ms = UNSAFE_RACE_DELAY.as_millis() as u64;
    }

    let ctx = Arc::new(LedgerContext::in_memory(config)?);
    ctx.store
        .insert(&Account::new(SOURCE, seed))
        .await
        .context("Failed to seed source account")?;
    for id in TARGETS {
        ctx.store.insert(&Account::new(id, Decimal::ZERO)).await?;
    }

    let barrier = Arc::new(Barrier::new(TARGETS.len()));
    let mut handles = Vec::with_capacity(TARGETS.len());
    for to in TARGETS {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ctx.engine.transfer(SOURCE, to, amount, strategy).await
        }));
    }

    let mut transfers = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = handle.await.context("Transfer task panicked")?;
        transfers.push(OperationResult::from(result));
    }

    let accounts = ctx.store.list().await?;
    let total: Decimal = ctx.store.total_balance().await?;
    let report = RaceOutput {
        strategy,
        conserved: total == seed,
        non_negative: accounts.iter().all(|a| a.balance >= Decimal::ZERO),
        transfers,
        accounts,
        total,
    };

    if json {
        return output::json(&report);
    }

    print_report(&report, amount);
    Ok(())
}

fn print_report(report: &RaceOutput, amount: Decimal) {
    output::info(&format!(
        "Racing {} -> {} and {} -> {} for {} each ({})",
        SOURCE, TARGETS[0], SOURCE, TARGETS[1], amount, report.strategy
    ));
    println!();

    for (to, result) in TARGETS.iter().zip(&report.transfers) {
        match (&result.data, &result.error) {
            (Some(receipt), _) if receipt.attempts > 1 => println!(
                "  {} -> {}: {} after {} attempts",
                SOURCE,
                to,
                "committed".green(),
                receipt.attempts
            ),
            (Some(_), _) => println!("  {} -> {}: {}", SOURCE, to, "committed".green()),
            (None, error) => println!(
                "  {} -> {}: {} {}",
                SOURCE,
                to,
                "rejected".red(),
                error.as_deref().unwrap_or_default()
            ),
        }
    }
    println!();

    let mut table = output::create_table();
    table.set_header(vec!["Account", "Balance", "Version"]);
    for account in &report.accounts {
        table.add_row(vec![
            comfy_table::Cell::new(account.id.as_str()),
            output::amount_cell(account.balance),
            comfy_table::Cell::new(account.version),
        ]);
    }
    println!("{}", table);
    println!("{} {}", "Total:".bold(), report.total);
    println!("Total conserved:  {}", output::check_mark(report.conserved));
    println!("No negative balance: {}", output::check_mark(report.non_negative));

    if !report.strategy.is_safe() && !report.conserved {
        output::warning("Lost update: both transfers validated against the same balance.");
    } else if !report.strategy.is_safe() {
        output::warning("No lost update this time; the unsafe strategy does not prevent one.");
    }
}
