//! Conflict detection - is a snapshot still current?

use crate::domain::result::TransferError;
use crate::domain::{Account, AccountId};
use crate::ports::{CasOutcome, VersionedWrite};

/// A write whose expected version no longer matches the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub account: AccountId,
    pub expected: u64,
    pub actual: u64,
}

impl From<Conflict> for CasOutcome {
    fn from(c: Conflict) -> Self {
        CasOutcome::VersionMismatch {
            account: c.account,
            expected: c.expected,
            actual: c.actual,
        }
    }
}

impl From<Conflict> for TransferError {
    fn from(c: Conflict) -> Self {
        TransferError::OptimisticConflict {
            account: c.account,
            expected: c.expected,
            actual: c.actual,
        }
    }
}

/// Version comparison between snapshots and stored records
pub struct ConflictDetector;

impl ConflictDetector {
    /// Whether a read at `expected_version` predates the last committed
    /// write of `current`
    pub fn is_stale(expected_version: u64, current: &Account) -> bool {
        expected_version != current.version
    }

    /// Check one pending write against the record currently stored
    pub fn check(write: &VersionedWrite, current: &Account) -> Option<Conflict> {
        Self::is_stale(write.expected_version, current).then(|| Conflict {
            account: current.id.clone(),
            expected: write.expected_version,
            actual: current.version,
        })
    }

    /// First conflicting write in `writes`, in order
    ///
    /// `current` looks up the stored record; writes whose record it cannot
    /// find are skipped, the caller reports those as missing.
    pub fn first_conflict<'a, F>(writes: &[VersionedWrite], mut current: F) -> Option<Conflict>
    where
        F: FnMut(&AccountId) -> Option<&'a Account>,
    {
        writes.iter().find_map(|write| {
            current(&write.account.id).and_then(|stored| Self::check(write, stored))
        })
    }
}
