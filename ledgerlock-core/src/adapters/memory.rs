//! In-memory account store
//!
//! A single `RwLock` over an ordered map makes every operation linearizable;
//! the batch compare-and-swap checks and writes under one write guard.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::key_locks::KeyLockTable;
use crate::domain::result::{StoreError, StoreResult};
use crate::domain::{Account, AccountId};
use crate::ports::{AccountStore, CasOutcome, ExclusiveAccess, VersionedWrite};
use crate::services::ConflictDetector;

/// In-process store, the reference `AccountStore`
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<BTreeMap<AccountId, Account>>,
    locks: KeyLockTable,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store already holding `accounts`
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> StoreResult<Self> {
        let store = Self::new();
        {
            let mut map = store.write()?;
            for account in accounts {
                account.validate().map_err(|e| StoreError::Invalid(e.to_string()))?;
                if map.contains_key(&account.id) {
                    return Err(StoreError::AlreadyExists(account.id));
                }
                map.insert(account.id.clone(), account);
            }
        }
        Ok(store)
    }

    /// Whether an exclusive hold on `id` is currently granted
    pub fn is_held(&self, id: &AccountId) -> bool {
        self.locks.is_held(id)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<AccountId, Account>>> {
        self.accounts.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<AccountId, Account>>> {
        self.accounts.write().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, account: &Account) -> StoreResult<()> {
        account.validate().map_err(|e| StoreError::Invalid(e.to_string()))?;
        let mut map = self.write()?;
        if map.contains_key(&account.id) {
            return Err(StoreError::AlreadyExists(account.id.clone()));
        }
        map.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Account>> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn get_for_exclusive_access(
        &self,
        id: &AccountId,
        timeout: Duration,
    ) -> StoreResult<ExclusiveAccess> {
        // Unknown ids never get a lock table entry
        let exists = self.read()?.contains_key(id);
        if !exists {
            return Err(StoreError::NotFound(id.clone()));
        }

        let hold = self.locks.acquire(id, timeout).await?;

        let account = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(ExclusiveAccess::new(account, hold))
    }

    async fn save(&self, account: &Account) -> StoreResult<Account> {
        let mut map = self.write()?;
        let stored = map
            .get_mut(&account.id)
            .ok_or_else(|| StoreError::NotFound(account.id.clone()))?;

        stored.balance = account.balance;
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn compare_and_swap_save_all(&self, writes: &[VersionedWrite]) -> StoreResult<CasOutcome> {
        let mut seen = HashSet::new();
        if let Some(dup) = writes.iter().find(|w| !seen.insert(&w.account.id)) {
            return Err(StoreError::Invalid(format!(
                "account {} appears twice in one write",
                dup.account.id
            )));
        }

        let mut map = self.write()?;

        if let Some(missing) = writes.iter().find(|w| !map.contains_key(&w.account.id)) {
            return Err(StoreError::NotFound(missing.account.id.clone()));
        }
        if let Some(conflict) = ConflictDetector::first_conflict(writes, |id| map.get(id)) {
            return Ok(conflict.into());
        }

        let now = Utc::now();
        let mut committed = Vec::with_capacity(writes.len());
        for write in writes {
            if let Some(stored) = map.get_mut(&write.account.id) {
                stored.balance = write.account.balance;
                stored.version += 1;
                stored.updated_at = now;
                committed.push(stored.clone());
            }
        }
        Ok(CasOutcome::Committed(committed))
    }
}
