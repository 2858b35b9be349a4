//! Transfer command - move funds between two accounts

use anyhow::Result;
use colored::Colorize;
use ledgerlock_core::{OperationResult, Strategy};
use rust_decimal::Decimal;

use super::get_context;
use crate::output;

pub async fn run(from: &str, to: &str, amount: Decimal, strategy: Strategy, json: bool) -> Result<()> {
    let ctx = get_context().await?;
    let result = ctx.engine.transfer(from, to, amount, strategy).await;

    if json {
        let failed = result.is_err();
        let report = OperationResult::from(result).with_context("strategy", serde_json::json!(strategy));
        output::json(&report)?;
        if failed {
            anyhow::bail!("transfer failed");
        }
        return Ok(());
    }

    let receipt = result?;
    output::success(&format!(
        "Moved {} from {} to {} ({})",
        receipt.amount, receipt.from.id, receipt.to.id, receipt.strategy
    ));
    println!(
        "  {} {} (version {})",
        format!("{}:", receipt.from.id).bold(),
        receipt.from.balance,
        receipt.from.version
    );
    println!(
        "  {} {} (version {})",
        format!("{}:", receipt.to.id).bold(),
        receipt.to.balance,
        receipt.to.version
    );
    if receipt.attempts > 1 {
        output::warning(&format!("Committed after {} attempts", receipt.attempts));
    }
    Ok(())
}
