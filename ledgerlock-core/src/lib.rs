//! Ledgerlock Core - concurrency-safe balance transfers
//!
//! This crate implements the core transfer logic following hexagonal architecture:
//!
//! - **domain**: Core entities (Account, Strategy, TransferReceipt) and errors
//! - **ports**: The `AccountStore` trait
//! - **services**: Transfer engine plus its conflict, retry and lock pieces
//! - **adapters**: Concrete stores (in-memory, DuckDB)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::DuckDbAccountStore;
use adapters::memory::InMemoryAccountStore;
use config::Config;
use ports::AccountStore;
use services::TransferEngine;

// Re-export commonly used types at crate root
pub use domain::result::{OperationResult, StoreError, TransferError};
pub use domain::{Account, AccountId, Strategy, TransferReceipt, TransferRequest};
pub use services::{EngineConfig, RetryPolicy};

const DB_FILENAME: &str = "ledgerlock.duckdb";

/// Main context for ledgerlock operations
///
/// Holds the configuration, the account store and the transfer engine
/// built on top of it.
pub struct LedgerContext {
    pub config: Config,
    pub store: Arc<dyn AccountStore>,
    pub engine: TransferEngine,
}

impl LedgerContext {
    /// Open the DuckDB store in `data_dir`, creating it if needed
    ///
    /// Blocks the calling thread while the database opens, including the
    /// backoff sleeps when the file is busy. Use [`LedgerContext::open`]
    /// from async code.
    pub fn new(data_dir: &Path) -> Result<Self> {
        let config = Config::load(data_dir)?;
        let store = Arc::new(DuckDbAccountStore::new(&data_dir.join(DB_FILENAME))?);
        Self::with_store(config, store)
    }

    /// Same as [`LedgerContext::new`], run on the blocking thread pool
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::new(&data_dir))
            .await
            .context("Opening the store panicked or was cancelled")?
    }

    /// Context over a fresh in-memory store
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::with_store(config, Arc::new(InMemoryAccountStore::new()))
    }

    pub fn with_store(config: Config, store: Arc<dyn AccountStore>) -> Result<Self> {
        let engine = TransferEngine::new(Arc::clone(&store), config.to_engine_config()?);
        Ok(Self {
            config,
            store,
            engine,
        })
    }
}
