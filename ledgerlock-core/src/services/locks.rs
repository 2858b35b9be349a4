//! Lock coordinator - ordered exclusive holds on account pairs
//!
//! Holds on a pair are always requested lowest id first. Two transfers over
//! the same pair, in either direction, therefore queue on the same first key
//! and can never each hold the key the other one waits for.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::result::{Result, TransferError};
use crate::domain::{Account, AccountId};
use crate::ports::{AccountStore, ExclusiveAccess};

/// The two ids in acquisition order
pub fn lock_order<'a>(a: &'a AccountId, b: &'a AccountId) -> (&'a AccountId, &'a AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Exclusive holds on both accounts of a transfer
#[derive(Debug)]
pub struct PairHold {
    first: ExclusiveAccess,
    second: ExclusiveAccess,
}

impl PairHold {
    /// The held account with id `id`, as read under the hold
    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        [&self.first, &self.second]
            .into_iter()
            .find(|hold| hold.id() == id)
            .map(ExclusiveAccess::account)
    }

    /// Ids in the order they were acquired
    pub fn acquisition_order(&self) -> (&AccountId, &AccountId) {
        (self.first.id(), self.second.id())
    }

    /// Release both holds
    pub fn release(self) {
        self.first.release();
        self.second.release();
    }
}

/// Acquires pair holds with one bounded wait for the whole pair
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    timeout: Duration,
}

impl LockCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Hold both `a` and `b`
    ///
    /// Both acquisitions share one deadline, `timeout` from the call. On any
    /// failure, including cancellation, a hold already granted on the first
    /// key is released before the error is returned.
    pub async fn acquire_pair(
        &self,
        store: &dyn AccountStore,
        a: &AccountId,
        b: &AccountId,
        cancel: &CancellationToken,
    ) -> Result<PairHold> {
        if a == b {
            return Err(TransferError::SameAccount(a.clone()));
        }
        let (low, high) = lock_order(a, b);
        let deadline = Instant::now() + self.timeout;

        let first = self.acquire_one(store, low, deadline, cancel).await?;
        let second = match self.acquire_one(store, high, deadline, cancel).await {
            Ok(hold) => hold,
            Err(e) => {
                first.release();
                return Err(e);
            }
        };

        debug!(first = %low, second = %high, "acquired pair hold");
        Ok(PairHold { first, second })
    }

    async fn acquire_one(
        &self,
        store: &dyn AccountStore,
        id: &AccountId,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ExclusiveAccess> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            hold = store.get_for_exclusive_access(id, remaining) => hold.map_err(TransferError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::adapters::memory::InMemoryAccountStore;

    fn store() -> Arc<InMemoryAccountStore> {
        Arc::new(
            InMemoryAccountStore::with_accounts([
                Account::new("A", Decimal::new(100, 0)),
                Account::new("B", Decimal::ZERO),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_lock_order_ignores_direction() {
        let a = AccountId::from("A");
        let b = AccountId::from("B");
        assert_eq!(lock_order(&a, &b), (&a, &b));
        assert_eq!(lock_order(&b, &a), (&a, &b));
    }

    #[tokio::test]
    async fn test_pair_is_acquired_low_id_first() {
        let store = store();
        let coordinator = LockCoordinator::new(Duration::from_millis(50));

        let pair = coordinator
            .acquire_pair(&*store, &"B".into(), &"A".into(), &CancellationToken::new())
            .await
            .unwrap();

        let (first, second) = pair.acquisition_order();
        assert_eq!(first.as_str(), "A");
        assert_eq!(second.as_str(), "B");
        assert_eq!(pair.account(&"A".into()).unwrap().balance, Decimal::new(100, 0));

        pair.release();
        assert!(!store.is_held(&"A".into()));
        assert!(!store.is_held(&"B".into()));
    }

    #[tokio::test]
    async fn test_timeout_on_second_key_releases_first() {
        let store = store();
        let coordinator = LockCoordinator::new(Duration::from_millis(20));

        let blocker = store
            .get_for_exclusive_access(&"B".into(), Duration::from_millis(20))
            .await
            .unwrap();

        let err = coordinator
            .acquire_pair(&*store, &"A".into(), &"B".into(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::LockTimeout { ref account, .. } if account.as_str() == "B"));
        assert!(!store.is_held(&"A".into()));
        drop(blocker);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_wait_is_bounded_by_one_timeout() {
        let store = store();
        let coordinator = LockCoordinator::new(Duration::from_millis(100));

        // A frees up after 60ms, B never does
        let a_holder = store
            .get_for_exclusive_access(&"A".into(), Duration::from_millis(20))
            .await
            .unwrap();
        let _b_holder = store
            .get_for_exclusive_access(&"B".into(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            a_holder.release();
        });

        let started = Instant::now();
        let err = coordinator
            .acquire_pair(&*store, &"A".into(), &"B".into(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::LockTimeout { ref account, .. } if account.as_str() == "B"));
        assert!(started.elapsed() <= Duration::from_millis(110), "waited {:?}", started.elapsed());
        assert!(!store.is_held(&"A".into()));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_releases_everything() {
        let store = store();
        let coordinator = LockCoordinator::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let blocker = store
            .get_for_exclusive_access(&"B".into(), Duration::from_millis(20))
            .await
            .unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = coordinator
            .acquire_pair(&*store, &"A".into(), &"B".into(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert!(!store.is_held(&"A".into()));

        // The cancelled waiter left the queue, so B frees up normally
        drop(blocker);
        assert!(!store.is_held(&"B".into()));
    }

    #[tokio::test]
    async fn test_same_account_is_rejected() {
        let store = store();
        let coordinator = LockCoordinator::new(Duration::from_millis(20));

        let err = coordinator
            .acquire_pair(&*store, &"A".into(), &"A".into(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::SameAccount(_)));
    }
}
