//! Service layer - transfer orchestration
//!
//! Services coordinate domain logic and port interactions. The transfer
//! engine is the entry point; the other services are the pieces it combines.

mod conflict;
mod locks;
pub mod migration;
pub mod retry;
mod transfer;

pub use conflict::{Conflict, ConflictDetector};
pub use locks::{lock_order, LockCoordinator, PairHold};
pub use migration::{MigrationResult, MigrationService};
pub use retry::{RetryCoordinator, RetryPolicy};
pub use transfer::{EngineConfig, TransferEngine};
