//! Transfer engine - applies a debit/credit pair under a chosen strategy
//!
//! All strategies share the same validation: positive amount, two distinct
//! accounts, both present, enough funds in the debited account, and both new
//! balances exactly representable. They differ only in how the
//! read-validate-write sequence is protected.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::locks::{LockCoordinator, PairHold};
use super::retry::{RetryCoordinator, RetryPolicy};
use crate::domain::result::{Result, StoreError, TransferError};
use crate::domain::{Account, AccountId, Strategy, TransferReceipt, TransferRequest};
use crate::ports::{AccountStore, CasOutcome, VersionedWrite};

/// Tunables for the transfer engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    /// Longest wait for both exclusive holds of a pessimistic transfer,
    /// shared by the two acquisitions
    pub lock_timeout: Duration,
    /// Pause between validation and writes on the unsafe path. Widens the
    /// race window for demonstrations; zero by default.
    pub unsafe_write_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lock_timeout: Duration::from_secs(5),
            unsafe_write_delay: Duration::ZERO,
        }
    }
}

/// Entry point for transfers
pub struct TransferEngine {
    store: Arc<dyn AccountStore>,
    retry: RetryCoordinator,
    locks: LockCoordinator,
    unsafe_write_delay: Duration,
}

impl TransferEngine {
    pub fn new(store: Arc<dyn AccountStore>, config: EngineConfig) -> Self {
        let retry = RetryCoordinator::new(config.retry);
        let locks = LockCoordinator::new(config.lock_timeout);
        debug!(
            max_attempts = retry.policy().max_attempts,
            lock_timeout_ms = locks.timeout().as_millis() as u64,
            "transfer engine ready"
        );
        Self {
            store,
            retry,
            locks,
            unsafe_write_delay: config.unsafe_write_delay,
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Move `amount` from `from` to `to` using `strategy`
    pub async fn transfer(
        &self,
        from: impl Into<AccountId>,
        to: impl Into<AccountId>,
        amount: Decimal,
        strategy: Strategy,
    ) -> Result<TransferReceipt> {
        let request = TransferRequest::new(from, to, amount);
        self.transfer_with_cancel(&request, strategy, &CancellationToken::new())
            .await
    }

    /// Like [`TransferEngine::transfer`], aborting blocking waits when
    /// `cancel` fires
    ///
    /// A cancelled transfer has written nothing and holds nothing.
    pub async fn transfer_with_cancel(
        &self,
        request: &TransferRequest,
        strategy: Strategy,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt> {
        let transfer_id = Uuid::new_v4();
        let span = info_span!(
            "transfer",
            %transfer_id,
            %strategy,
            from = %request.from,
            to = %request.to,
        );

        async {
            validate_request(request)?;

            let ((from, to), attempts) = match strategy {
                Strategy::Unsafe => (self.transfer_unsafe(request, cancel).await?, 1),
                Strategy::Optimistic => (self.transfer_optimistic(request).await?, 1),
                Strategy::OptimisticWithRetry => {
                    self.retry
                        .run(cancel, |attempt| {
                            debug!(attempt, "optimistic attempt");
                            self.transfer_optimistic(request)
                        })
                        .await?
                }
                Strategy::Pessimistic => (self.transfer_pessimistic(request, cancel).await?, 1),
            };

            info!(amount = %request.amount, attempts, "transfer committed");
            Ok::<_, TransferError>(TransferReceipt {
                transfer_id,
                strategy,
                amount: request.amount,
                from,
                to,
                attempts,
            })
        }
        .instrument(span)
        .await
        .map_err(|e| {
            debug!(%transfer_id, kind = e.kind(), "transfer failed: {}", e);
            e
        })
    }

    /// Read, check, then two independent unconditional writes
    async fn transfer_unsafe(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<(Account, Account)> {
        let (from, to) = self.read_pair(request).await?;
        let (from, to) = apply_transfer(&from, &to, request.amount)?;

        if !self.unsafe_write_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(self.unsafe_write_delay) => {}
            }
        }

        let from = self.store.save(&from).await?;
        let to = self.store.save(&to).await?;
        Ok((from, to))
    }

    /// One read-validate-compare-and-swap attempt
    async fn transfer_optimistic(&self, request: &TransferRequest) -> Result<(Account, Account)> {
        let (from, to) = self.read_pair(request).await?;
        let (from, to) = apply_transfer(&from, &to, request.amount)?;
        self.commit_pair(request, from, to).await
    }

    /// Ordered holds on both accounts around read-validate-write
    async fn transfer_pessimistic(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<(Account, Account)> {
        let pair = self
            .locks
            .acquire_pair(&*self.store, &request.from, &request.to, cancel)
            .await?;

        let from = held(&pair, &request.from)?;
        let to = held(&pair, &request.to)?;
        let (from, to) = apply_transfer(&from, &to, request.amount)?;

        // Holds only exclude other pessimistic callers; the version check
        // still catches a write made meanwhile by another strategy
        let written = self.commit_pair(request, from, to).await;
        pair.release();
        written
    }

    async fn read_pair(&self, request: &TransferRequest) -> Result<(Account, Account)> {
        let from = self
            .store
            .get(&request.from)
            .await?
            .ok_or_else(|| TransferError::AccountNotFound(request.from.clone()))?;
        let to = self
            .store
            .get(&request.to)
            .await?
            .ok_or_else(|| TransferError::AccountNotFound(request.to.clone()))?;
        Ok((from, to))
    }

    /// Write both updated snapshots if neither went stale
    async fn commit_pair(
        &self,
        request: &TransferRequest,
        from: Account,
        to: Account,
    ) -> Result<(Account, Account)> {
        let writes = [VersionedWrite::from_snapshot(from), VersionedWrite::from_snapshot(to)];

        match self.store.compare_and_swap_save_all(&writes).await? {
            CasOutcome::Committed(written) => split_pair(written, &request.from, &request.to),
            CasOutcome::VersionMismatch {
                account,
                expected,
                actual,
            } => Err(TransferError::OptimisticConflict {
                account,
                expected,
                actual,
            }),
        }
    }
}

fn validate_request(request: &TransferRequest) -> Result<()> {
    if request.amount <= Decimal::ZERO {
        return Err(TransferError::InvalidAmount(request.amount));
    }
    if request.from == request.to {
        return Err(TransferError::SameAccount(request.from.clone()));
    }
    Ok(())
}

/// Check funds and compute both new snapshots, before anything is written
fn apply_transfer(from: &Account, to: &Account, amount: Decimal) -> Result<(Account, Account)> {
    if !from.can_cover(amount) {
        return Err(TransferError::InsufficientFunds {
            account: from.id.clone(),
            available: from.balance,
            requested: amount,
        });
    }
    let out_of_range = |account: &Account| TransferError::AmountOutOfRange {
        account: account.id.clone(),
        balance: account.balance,
        amount,
    };
    let debited = from.debited(amount).ok_or_else(|| out_of_range(from))?;
    let credited = to.credited(amount).ok_or_else(|| out_of_range(to))?;
    Ok((debited, credited))
}

fn held(pair: &PairHold, id: &AccountId) -> Result<Account> {
    pair.account(id)
        .cloned()
        .ok_or_else(|| TransferError::AccountNotFound(id.clone()))
}

fn split_pair(written: Vec<Account>, from: &AccountId, to: &AccountId) -> Result<(Account, Account)> {
    let mut from_account = None;
    let mut to_account = None;
    for account in written {
        if &account.id == from {
            from_account = Some(account);
        } else if &account.id == to {
            to_account = Some(account);
        }
    }
    match (from_account, to_account) {
        (Some(f), Some(t)) => Ok((f, t)),
        _ => Err(TransferError::Store(StoreError::Invalid(
            "store did not return both written accounts".to_string(),
        ))),
    }
}
