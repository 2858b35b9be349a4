//! Account domain model

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identifier of a ledger account
///
/// The `Ord` implementation is the global lock order used by pessimistic
/// transfers, so it must stay a plain total order over the id text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One ledger balance
///
/// Instances held outside the store are snapshots: `version` records which
/// committed state the snapshot was taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    /// Bumped by the store exactly once per committed write
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a seed account at version 0
    pub fn new(id: impl Into<AccountId>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            balance,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether this account can be debited by `amount`
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Copy of this snapshot with `amount` removed from the balance
    ///
    /// `None` when the result overflows or cannot be held exactly.
    pub fn debited(&self, amount: Decimal) -> Option<Self> {
        Some(Self {
            balance: exact_sub(self.balance, amount)?,
            ..self.clone()
        })
    }

    /// Copy of this snapshot with `amount` added to the balance
    ///
    /// `None` when the result overflows or cannot be held exactly.
    pub fn credited(&self, amount: Decimal) -> Option<Self> {
        Some(Self {
            balance: exact_add(self.balance, amount)?,
            ..self.clone()
        })
    }

    /// Validate seed data
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.id.as_str().trim().is_empty() {
            return Err("account id cannot be empty");
        }
        if self.balance < Decimal::ZERO {
            return Err("seed balance cannot be negative");
        }
        Ok(())
    }
}

/// `a + b`, or `None` if it overflows or had to be rounded
///
/// `Decimal` keeps 96 bits of mantissa and rounds by dropping scale when a
/// sum needs more, so an exact sum always keeps the larger operand scale.
pub fn exact_add(a: Decimal, b: Decimal) -> Option<Decimal> {
    let sum = a.checked_add(b)?;
    (sum.scale() >= a.scale().max(b.scale())).then_some(sum)
}

/// `a - b`, or `None` if it overflows or had to be rounded
pub fn exact_sub(a: Decimal, b: Decimal) -> Option<Decimal> {
    let difference = a.checked_sub(b)?;
    (difference.scale() >= a.scale().max(b.scale())).then_some(difference)
}
