//! Balances command - list accounts and the total

use anyhow::Result;
use colored::Colorize;
use ledgerlock_core::OperationResult;
use rust_decimal::Decimal;
use serde::Serialize;

use super::get_context;
use crate::output;

#[derive(Serialize)]
struct BalancesOutput {
    accounts: Vec<ledgerlock_core::Account>,
    total: Decimal,
}

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context().await?;
    let accounts = ctx.store.list().await?;
    let total: Decimal = ctx.store.total_balance().await?;

    if json {
        return output::json(&OperationResult::ok(BalancesOutput { accounts, total }));
    }

    if accounts.is_empty() {
        output::warning("No accounts yet. Use 'ledgerlock seed A=100 B=0' to create some.");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Account", "Balance", "Version", "Updated"]);
    for account in &accounts {
        table.add_row(vec![
            comfy_table::Cell::new(account.id.as_str()),
            output::amount_cell(account.balance),
            comfy_table::Cell::new(account.version),
            comfy_table::Cell::new(account.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!("{}", table);
    println!("{} {}", "Total:".bold(), total);
    Ok(())
}
