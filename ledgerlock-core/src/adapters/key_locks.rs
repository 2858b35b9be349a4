//! Per-key exclusive holds
//!
//! Each account id gets its own `tokio::sync::Mutex<()>`. Waiters are queued
//! in arrival order, so a steady stream of new requests cannot starve an
//! earlier one. Holds are process-local.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::result::{StoreError, StoreResult};
use crate::domain::AccountId;

/// Table of exclusive holds keyed by account id
#[derive(Default)]
pub struct KeyLockTable {
    locks: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, id: &AccountId) -> StoreResult<Arc<AsyncMutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(Arc::clone(
            locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        ))
    }

    /// Wait up to `timeout` for the hold on `id`
    ///
    /// Dropping the returned future before it resolves leaves the wait queue
    /// without taking the hold.
    pub async fn acquire(&self, id: &AccountId, timeout: Duration) -> StoreResult<OwnedMutexGuard<()>> {
        let lock = self.lock_for(id)?;
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::Timeout {
                account: id.clone(),
                waited: timeout,
            })
    }

    /// Whether some caller currently holds `id`
    pub fn is_held(&self, id: &AccountId) -> bool {
        let locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(_) => return false,
        };
        locks
            .get(id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
