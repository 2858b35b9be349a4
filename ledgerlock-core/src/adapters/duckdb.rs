//! DuckDB account store
//!
//! Balances live in `sys_accounts`. The batch compare-and-swap runs inside
//! one DuckDB transaction that is rolled back on any mismatch, and the
//! connection mutex serializes it against every other statement, so the
//! check and the write cannot interleave with another writer.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection, OptionalExt};
use rust_decimal::Decimal;
use tracing::warn;

use super::key_locks::KeyLockTable;
use crate::domain::result::{StoreError, StoreResult};
use crate::domain::{Account, AccountId};
use crate::ports::{AccountStore, CasOutcome, ExclusiveAccess, VersionedWrite};
use crate::services::{ConflictDetector, MigrationService};

/// Maximum number of attempts when the database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

const SELECT_ACCOUNT: &str =
    "SELECT account_id, balance, version, updated_at FROM sys_accounts WHERE account_id = ?";

impl From<duckdb::Error> for StoreError {
    fn from(e: duckdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("could not set lock on file")
}

/// Row as stored, before decimal and timestamp parsing
struct AccountRow {
    id: String,
    balance: String,
    version: i64,
    updated_at: String,
}

impl AccountRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            balance: row.get(1)?,
            version: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn into_account(self) -> StoreResult<Account> {
        let balance = Decimal::from_str_exact(&self.balance).map_err(|e| {
            StoreError::database(format!("bad balance {:?} for {}: {}", self.balance, self.id, e))
        })?;
        let version = u64::try_from(self.version)
            .map_err(|_| StoreError::database(format!("negative version for {}", self.id)))?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::database(format!("bad timestamp for {}: {}", self.id, e)))?;

        Ok(Account {
            id: AccountId::new(self.id),
            balance,
            version,
            updated_at,
        })
    }
}

fn version_param(version: u64) -> StoreResult<i64> {
    i64::try_from(version).map_err(|_| StoreError::Invalid(format!("version {} out of range", version)))
}

/// DuckDB-backed `AccountStore`
pub struct DuckDbAccountStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    locks: KeyLockTable,
}

impl DuckDbAccountStore {
    /// Open (or create) the database file and run pending migrations
    ///
    /// Opening is retried with exponential backoff on file locking errors,
    /// which happen when another process still has the file open. The
    /// backoff sleeps block the calling thread.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Self::from_connection(conn, Some(db_path.to_path_buf()));
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            delay_ms = delay.as_millis() as u64,
                            "Database busy, retrying: {}",
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    /// Fresh in-memory database, for tests and throwaway runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading is not needed and may pick up foreign binaries
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)
            .with_context(|| format!("Failed to open {}", db_path.display()))?;
        Ok(conn)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        MigrationService::new(&conn).run_pending()?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            locks: KeyLockTable::new(),
        })
    }

    /// Path of the database file, `None` when in memory
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Whether some caller currently holds `id` exclusively
    pub fn is_held(&self, id: &AccountId) -> bool {
        self.locks.is_held(id)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn select_account(conn: &Connection, id: &AccountId) -> StoreResult<Option<Account>> {
        let row = conn
            .query_row(SELECT_ACCOUNT, [id.as_str()], AccountRow::from_row)
            .optional()?;
        row.map(AccountRow::into_account).transpose()
    }

    fn read_account(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        let conn = self.conn()?;
        Self::select_account(&conn, id)
    }

    fn insert_account(&self, account: &Account) -> StoreResult<()> {
        account.validate().map_err(|e| StoreError::Invalid(e.to_string()))?;
        let conn = self.conn()?;
        if Self::select_account(&conn, &account.id)?.is_some() {
            return Err(StoreError::AlreadyExists(account.id.clone()));
        }
        conn.execute(
            "INSERT INTO sys_accounts (account_id, balance, version, updated_at) VALUES (?, ?, ?, ?)",
            params![
                account.id.as_str(),
                account.balance.to_string(),
                version_param(account.version)?,
                account.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT account_id, balance, version, updated_at FROM sys_accounts ORDER BY account_id",
        )?;
        let rows = stmt
            .query_map([], AccountRow::from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        rows.into_iter().map(AccountRow::into_account).collect()
    }

    fn save_account(&self, account: &Account) -> StoreResult<Account> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sys_accounts SET balance = ?, version = version + 1, updated_at = ?
             WHERE account_id = ?",
            params![
                account.balance.to_string(),
                Utc::now().to_rfc3339(),
                account.id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(account.id.clone()));
        }
        Self::select_account(&conn, &account.id)?
            .ok_or_else(|| StoreError::NotFound(account.id.clone()))
    }

    fn cas_accounts(&self, writes: &[VersionedWrite]) -> StoreResult<CasOutcome> {
        let mut seen = HashSet::new();
        if let Some(dup) = writes.iter().find(|w| !seen.insert(&w.account.id)) {
            return Err(StoreError::Invalid(format!(
                "account {} appears twice in one write",
                dup.account.id
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut current = HashMap::with_capacity(writes.len());
        for write in writes {
            let id = &write.account.id;
            let stored = Self::select_account(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            current.insert(id.clone(), stored);
        }
        // Returning early drops `tx`, which rolls it back
        if let Some(conflict) = ConflictDetector::first_conflict(writes, |id| current.get(id)) {
            return Ok(conflict.into());
        }

        let now = Utc::now().to_rfc3339();
        for write in writes {
            let changed = tx.execute(
                "UPDATE sys_accounts SET balance = ?, version = version + 1, updated_at = ?
                 WHERE account_id = ? AND version = ?",
                params![
                    write.account.balance.to_string(),
                    now,
                    write.account.id.as_str(),
                    version_param(write.expected_version)?,
                ],
            )?;
            if changed != 1 {
                let actual = Self::select_account(&tx, &write.account.id)?
                    .map(|a| a.version)
                    .unwrap_or_default();
                return Ok(CasOutcome::VersionMismatch {
                    account: write.account.id.clone(),
                    expected: write.expected_version,
                    actual,
                });
            }
        }

        let mut committed = Vec::with_capacity(writes.len());
        for write in writes {
            let id = &write.account.id;
            committed.push(Self::select_account(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?);
        }
        tx.commit()?;
        Ok(CasOutcome::Committed(committed))
    }
}

#[async_trait]
impl AccountStore for DuckDbAccountStore {
    async fn insert(&self, account: &Account) -> StoreResult<()> {
        self.insert_account(account)
    }

    async fn get(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        self.read_account(id)
    }

    async fn list(&self) -> StoreResult<Vec<Account>> {
        self.list_accounts()
    }

    async fn get_for_exclusive_access(
        &self,
        id: &AccountId,
        timeout: Duration,
    ) -> StoreResult<ExclusiveAccess> {
        if self.read_account(id)?.is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }

        let hold = self.locks.acquire(id, timeout).await?;

        let account = self
            .read_account(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        Ok(ExclusiveAccess::new(account, hold))
    }

    async fn save(&self, account: &Account) -> StoreResult<Account> {
        self.save_account(account)
    }

    async fn compare_and_swap_save_all(&self, writes: &[VersionedWrite]) -> StoreResult<CasOutcome> {
        self.cas_accounts(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> DuckDbAccountStore {
        let store = DuckDbAccountStore::open_in_memory().unwrap();
        store.insert_account(&Account::new("A", Decimal::new(10050, 2))).unwrap();
        store.insert_account(&Account::new("B", Decimal::ZERO)).unwrap();
        store
    }

    #[test]
    fn test_balance_round_trips_exactly() {
        let store = seeded();
        let a = store.read_account(&"A".into()).unwrap().unwrap();
        assert_eq!(a.balance, Decimal::new(10050, 2));
        assert_eq!(a.version, 0);
    }

    #[test]
    fn test_insert_rejects_duplicate_ids() {
        let store = seeded();
        let err = store.insert_account(&Account::new("A", Decimal::ONE)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_cas_mismatch_rolls_back_every_key() {
        let store = seeded();
        let a = store.read_account(&"A".into()).unwrap().unwrap();
        let b = store.read_account(&"B".into()).unwrap().unwrap();

        store.save_account(&a.debited(Decimal::ONE).unwrap()).unwrap();

        let outcome = store
            .cas_accounts(&[
                VersionedWrite::from_snapshot(b.credited(Decimal::TEN).unwrap()),
                VersionedWrite::from_snapshot(a.debited(Decimal::TEN).unwrap()),
            ])
            .unwrap();
        assert!(!outcome.is_committed());

        // B was current but must not have been written
        let b_after = store.read_account(&"B".into()).unwrap().unwrap();
        assert_eq!(b_after.balance, Decimal::ZERO);
        assert_eq!(b_after.version, 0);
    }

    #[test]
    fn test_cas_commit_bumps_versions() {
        let store = seeded();
        let a = store.read_account(&"A".into()).unwrap().unwrap();
        let b = store.read_account(&"B".into()).unwrap().unwrap();

        let outcome = store
            .cas_accounts(&[
                VersionedWrite::from_snapshot(a.debited(Decimal::new(5025, 2)).unwrap()),
                VersionedWrite::from_snapshot(b.credited(Decimal::new(5025, 2)).unwrap()),
            ])
            .unwrap();
        assert!(outcome.is_committed());

        let accounts = store.list_accounts().unwrap();
        assert!(accounts.iter().all(|a| a.version == 1));
        assert!(accounts.iter().all(|a| a.balance == Decimal::new(5025, 2)));
    }

    #[test]
    fn test_save_unknown_account_is_not_found() {
        let store = seeded();
        let err = store.save_account(&Account::new("Z", Decimal::ONE)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_retryable_error_detection() {
        assert!(is_retryable_error("IO Error: Could not set lock on file"));
        assert!(is_retryable_error("database is locked"));
        assert!(!is_retryable_error("Catalog Error: Table does not exist"));
    }
}
