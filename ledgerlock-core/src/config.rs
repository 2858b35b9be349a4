//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "retry": { "maxAttempts": 3, "initialBackoffMs": 50, "maxBackoffMs": 50, "multiplier": 1, "jitter": false },
//!   "locks": { "timeoutMs": 5000 },
//!   "unsafeWriteDelayMs": 0
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::services::{EngineConfig, RetryPolicy};

/// Environment override for the retry attempt count
pub const ENV_MAX_ATTEMPTS: &str = "LEDGERLOCK_MAX_ATTEMPTS";
/// Environment override for the pessimistic pair timeout
pub const ENV_LOCK_TIMEOUT_MS: &str = "LEDGERLOCK_LOCK_TIMEOUT_MS";

const SETTINGS_FILE: &str = "settings.json";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    retry: RetrySettings,
    #[serde(default)]
    locks: LockSettings,
    #[serde(default)]
    unsafe_write_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: false,
        }
    }
}

impl RetrySettings {
    fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSettings {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    50
}

fn default_multiplier() -> u32 {
    1
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

/// Ledgerlock configuration (simplified view of settings)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub retry: RetrySettings,
    pub locks: LockSettings,
    pub unsafe_write_delay_ms: u64,
}

impl Config {
    /// Load config from the data directory
    ///
    /// A missing file yields defaults. A malformed file is logged and
    /// ignored. `LEDGERLOCK_MAX_ATTEMPTS` and `LEDGERLOCK_LOCK_TIMEOUT_MS`
    /// override the file.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join(SETTINGS_FILE);

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring malformed {}: {}", settings_path.display(), e);
                SettingsFile::default()
            })
        } else {
            SettingsFile::default()
        };

        let mut config = Self {
            retry: raw.retry,
            locks: raw.locks,
            unsafe_write_delay_ms: raw.unsafe_write_delay_ms,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_var(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = value
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_MAX_ATTEMPTS))?;
        }
        if let Some(value) = env_var(ENV_LOCK_TIMEOUT_MS) {
            self.locks.timeout_ms = value
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds", ENV_LOCK_TIMEOUT_MS))?;
        }
        Ok(())
    }

    /// Engine settings, validated
    pub fn to_engine_config(&self) -> Result<EngineConfig> {
        let retry = self.retry.to_policy();
        retry
            .validate()
            .map_err(|e| anyhow!("Invalid retry settings: {}", e))?;

        Ok(EngineConfig {
            retry,
            lock_timeout: Duration::from_millis(self.locks.timeout_ms),
            unsafe_write_delay: Duration::from_millis(self.unsafe_write_delay_ms),
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        let engine = config.to_engine_config().unwrap();

        assert_eq!(engine, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{ "retry": { "maxAttempts": 7 }, "locks": { "timeoutMs": 250 } }"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(config.locks.timeout_ms, 250);
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.retry, RetrySettings::default());
        assert_eq!(config.locks, LockSettings::default());
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.to_engine_config().is_err());
    }
}
