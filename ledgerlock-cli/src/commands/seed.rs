//! Seed command - create accounts with opening balances

use anyhow::{anyhow, Context, Result};
use ledgerlock_core::{Account, OperationResult};
use rust_decimal::Decimal;

use super::get_context;
use crate::output;

/// Parse `ID=AMOUNT`
fn parse_entry(entry: &str) -> Result<Account> {
    let (id, amount) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected ID=AMOUNT, got '{}'", entry))?;
    let amount: Decimal = amount
        .trim()
        .parse()
        .with_context(|| format!("Invalid amount in '{}'", entry))?;

    let account = Account::new(id.trim(), amount);
    account
        .validate()
        .map_err(|e| anyhow!("Invalid account '{}': {}", entry, e))?;
    Ok(account)
}

pub async fn run(entries: &[String], json: bool) -> Result<()> {
    // Parse everything before touching the store
    let accounts = entries
        .iter()
        .map(|e| parse_entry(e))
        .collect::<Result<Vec<_>>>()?;

    let ctx = get_context().await?;
    let mut created = Vec::with_capacity(accounts.len());
    for account in accounts {
        ctx.store
            .insert(&account)
            .await
            .with_context(|| format!("Failed to create account {}", account.id))?;
        created.push(account);
    }

    if json {
        return output::json(&OperationResult::ok(created));
    }

    for account in &created {
        output::success(&format!("Created {} with balance {}", account.id, account.balance));
    }
    Ok(())
}
