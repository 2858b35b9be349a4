//! Result and error types for the core library

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::AccountId;

/// Errors raised by an account store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Account {0} not found")]
    NotFound(AccountId),

    #[error("Account {0} already exists")]
    AlreadyExists(AccountId),

    #[error("Timed out after {waited:?} waiting for exclusive access to account {account}")]
    Timeout { account: AccountId, waited: Duration },

    #[error("Invalid account: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Store state poisoned by a panicked writer")]
    Poisoned,

    #[error("Sum of balances cannot be represented exactly")]
    TotalOutOfRange,
}

impl StoreError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }
}

/// Store result type
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Transfer error taxonomy
///
/// Only [`TransferError::OptimisticConflict`] is a concurrency artifact;
/// every other variant is final for the call that produced it.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds in account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Optimistic conflict on account {account}: expected version {expected}, found {actual}")]
    OptimisticConflict {
        account: AccountId,
        expected: u64,
        actual: u64,
    },

    #[error("Transfer failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<TransferError>,
    },

    #[error("Timed out after {waited:?} waiting for a lock on account {account}")]
    LockTimeout { account: AccountId, waited: Duration },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    #[error("Moving {amount} would take account {account} (balance {balance}) out of exact range")]
    AmountOutOfRange {
        account: AccountId,
        balance: Decimal,
        amount: Decimal,
    },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl TransferError {
    /// Whether a fresh attempt could succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::OptimisticConflict { .. })
    }

    /// Short machine-readable name, used in CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::AccountNotFound(_) => "account_not_found",
            TransferError::InsufficientFunds { .. } => "insufficient_funds",
            TransferError::OptimisticConflict { .. } => "optimistic_conflict",
            TransferError::RetryExhausted { .. } => "retry_exhausted",
            TransferError::LockTimeout { .. } => "lock_timeout",
            TransferError::Cancelled => "cancelled",
            TransferError::InvalidAmount(_) => "invalid_amount",
            TransferError::SameAccount(_) => "same_account",
            TransferError::AmountOutOfRange { .. } => "amount_out_of_range",
            TransferError::Store(_) => "store",
        }
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => TransferError::AccountNotFound(id),
            StoreError::Timeout { account, waited } => TransferError::LockTimeout { account, waited },
            other => TransferError::Store(other),
        }
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, TransferError>;

/// Operation result with optional context (for JSON output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Attach a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                let kind = e.kind();
                Self::fail(e.to_string()).with_context("kind", serde_json::Value::from(kind))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_from_result_records_kind() {
        let err: Result<i32> = Err(TransferError::InvalidAmount(Decimal::ZERO));
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("must be positive"));
        let context = result.context.unwrap();
        assert_eq!(context["kind"], "invalid_amount");
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = TransferError::OptimisticConflict {
            account: "A".into(),
            expected: 1,
            actual: 2,
        };
        assert!(conflict.is_retryable());
        assert!(!TransferError::AccountNotFound("A".into()).is_retryable());
        assert!(!TransferError::Cancelled.is_retryable());

        let exhausted = TransferError::RetryExhausted {
            attempts: 3,
            last: Box::new(conflict),
        };
        assert!(!exhausted.is_retryable());
        assert!(exhausted.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_store_errors_map_onto_transfer_errors() {
        let not_found: TransferError = StoreError::NotFound("X".into()).into();
        assert!(matches!(not_found, TransferError::AccountNotFound(id) if id.as_str() == "X"));

        let timeout: TransferError = StoreError::Timeout {
            account: "A".into(),
            waited: Duration::from_millis(10),
        }
        .into();
        assert!(matches!(timeout, TransferError::LockTimeout { .. }));

        let db: TransferError = StoreError::database("disk full").into();
        assert_eq!(db.kind(), "store");
    }
}
