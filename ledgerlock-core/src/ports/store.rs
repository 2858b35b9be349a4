//! Account store port - the single shared mutable resource

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;

use crate::domain::result::{StoreError, StoreResult};
use crate::domain::{exact_add, Account, AccountId};

/// A record to write, conditional on the stored version still matching
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedWrite {
    pub account: Account,
    pub expected_version: u64,
}

impl VersionedWrite {
    pub fn new(account: Account, expected_version: u64) -> Self {
        Self {
            account,
            expected_version,
        }
    }

    /// Write back a modified snapshot, expecting the version it was read at
    pub fn from_snapshot(account: Account) -> Self {
        let expected_version = account.version;
        Self::new(account, expected_version)
    }
}

/// Result of a compare-and-swap write
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// Every record was written; contains them as stored (versions bumped)
    Committed(Vec<Account>),
    /// Nothing was written; the first key found out of date
    VersionMismatch {
        account: AccountId,
        expected: u64,
        actual: u64,
    },
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CasOutcome::Committed(_))
    }
}

/// Exclusive hold on one account key
///
/// Holds the account as read after the hold was granted. Other callers of
/// [`AccountStore::get_for_exclusive_access`] on the same key wait until this
/// value is released or dropped.
pub struct ExclusiveAccess {
    account: Account,
    _hold: OwnedMutexGuard<()>,
}

impl ExclusiveAccess {
    pub fn new(account: Account, hold: OwnedMutexGuard<()>) -> Self {
        Self {
            account,
            _hold: hold,
        }
    }

    pub fn id(&self) -> &AccountId {
        &self.account.id
    }

    /// The account as read under the hold
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Release the hold
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for ExclusiveAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveAccess")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Account store abstraction
///
/// Implementations must be linearizable per key, and
/// [`AccountStore::compare_and_swap_save_all`] must check and write every
/// record as one indivisible step.
#[async_trait]
pub trait AccountStore: Send + Sync {
    // === Seeding ===

    /// Insert a new account; fails if the id is taken
    async fn insert(&self, account: &Account) -> StoreResult<()>;

    // === Reads ===

    /// Plain read, no coordination
    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>>;

    /// All accounts, ordered by id
    async fn list(&self) -> StoreResult<Vec<Account>>;

    /// Wait (at most `timeout`) for the exclusive hold on `id`, then read it
    ///
    /// Fails with `StoreError::NotFound` for unknown ids and
    /// `StoreError::Timeout` when the hold is not granted in time.
    async fn get_for_exclusive_access(
        &self,
        id: &AccountId,
        timeout: Duration,
    ) -> StoreResult<ExclusiveAccess>;

    // === Writes ===

    /// Unconditional write of the balance; the store still bumps the version
    async fn save(&self, account: &Account) -> StoreResult<Account>;

    /// Write every record only if every stored version matches
    async fn compare_and_swap_save_all(&self, writes: &[VersionedWrite]) -> StoreResult<CasOutcome>;

    /// Single-record form of [`AccountStore::compare_and_swap_save_all`]
    async fn compare_and_swap_save(
        &self,
        account: &Account,
        expected_version: u64,
    ) -> StoreResult<CasOutcome> {
        self.compare_and_swap_save_all(&[VersionedWrite::new(account.clone(), expected_version)])
            .await
    }

    // === Aggregates ===

    /// Sum of every balance in the store
    async fn total_balance(&self) -> StoreResult<Decimal> {
        let accounts = self.list().await?;
        accounts
            .iter()
            .try_fold(Decimal::ZERO, |total, a| exact_add(total, a.balance))
            .ok_or(StoreError::TotalOutOfRange)
    }
}
