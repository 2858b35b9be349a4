//! Transfer request, strategy and receipt

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::{Account, AccountId};

/// Concurrency control strategy used to apply a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// No coordination at all. Kept to demonstrate lost updates.
    Unsafe,
    /// Single version-checked attempt
    Optimistic,
    /// Version-checked attempts under a bounded retry policy
    OptimisticWithRetry,
    /// Ordered exclusive holds on both accounts
    Pessimistic,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Unsafe,
        Strategy::Optimistic,
        Strategy::OptimisticWithRetry,
        Strategy::Pessimistic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Unsafe => "unsafe",
            Strategy::Optimistic => "optimistic",
            Strategy::OptimisticWithRetry => "optimistic-with-retry",
            Strategy::Pessimistic => "pessimistic",
        }
    }

    /// Whether the strategy guarantees conservation and non-negativity
    pub fn is_safe(&self) -> bool {
        !matches!(self, Strategy::Unsafe)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "unsafe" => Ok(Strategy::Unsafe),
            "optimistic" => Ok(Strategy::Optimistic),
            "optimistic-with-retry" | "retry" => Ok(Strategy::OptimisticWithRetry),
            "pessimistic" => Ok(Strategy::Pessimistic),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// A request to move `amount` from one account to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn new(from: impl Into<AccountId>, to: impl Into<AccountId>, amount: Decimal) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }
}

/// Outcome of a committed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub strategy: Strategy,
    pub amount: Decimal,
    /// Debited account as written by this transfer
    pub from: Account,
    /// Credited account as written by this transfer
    pub to: Account,
    /// Number of attempts made, 1 unless the strategy retries
    pub attempts: u32,
}
