//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod account;
pub mod result;
mod transfer;

pub use account::{exact_add, exact_sub, Account, AccountId};
pub use transfer::{Strategy, TransferReceipt, TransferRequest};
