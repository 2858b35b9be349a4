//! CLI command implementations

pub mod balances;
pub mod race;
pub mod seed;
pub mod transfer;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use ledgerlock_core::LedgerContext;

/// Overrides the data directory
pub const DIR_ENV: &str = "LEDGERLOCK_DIR";

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".ledgerlock"))
        .ok_or_else(|| anyhow!("Could not find home directory; set {}", DIR_ENV))
}

/// Open the context over the on-disk store
pub async fn get_context() -> Result<LedgerContext> {
    let data_dir = get_data_dir()?;

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    LedgerContext::open(&data_dir)
        .await
        .context("Failed to initialize ledgerlock context")
}
