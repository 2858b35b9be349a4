//! Schema migrations for the DuckDB account store
//!
//! Each entry of [`MIGRATIONS`] is applied at most once and recorded in
//! `sys_migrations`.

use anyhow::{Context, Result};
use duckdb::Connection;
use tracing::debug;

use crate::migrations::MIGRATIONS;

const BOOTSTRAP: &str = "000_migrations.sql";

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Names of newly applied migrations
    pub applied: Vec<String>,
    /// Count of migrations that were already applied
    pub already_applied: usize,
}

/// Applies pending migrations on one connection
pub struct MigrationService<'a> {
    conn: &'a Connection,
}

impl<'a> MigrationService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Apply every migration not yet recorded, in order
    pub fn run_pending(&self) -> Result<MigrationResult> {
        let bootstrapped = self.migrations_table_exists()?;
        let already = if bootstrapped { self.get_applied()? } else { Vec::new() };

        let mut applied = Vec::new();
        for (name, sql) in MIGRATIONS {
            if already.iter().any(|a| a == name) {
                continue;
            }
            self.conn
                .execute_batch(sql)
                .with_context(|| format!("Migration {} failed", name))?;
            self.record_migration(name)?;
            debug!(migration = name, "applied migration");
            applied.push(name.to_string());
        }

        Ok(MigrationResult {
            applied,
            already_applied: already.len(),
        })
    }

    fn migrations_table_exists(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'sys_migrations'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Names of applied migrations
    pub fn get_applied(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT migration_name FROM sys_migrations ORDER BY migration_name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn record_migration(&self, name: &str) -> Result<()> {
        // The bootstrap script may be re-run against an existing table
        let sql = if name == BOOTSTRAP {
            "INSERT INTO sys_migrations (migration_name) VALUES (?) ON CONFLICT DO NOTHING"
        } else {
            "INSERT INTO sys_migrations (migration_name) VALUES (?)"
        };
        self.conn.execute(sql, [name])?;
        Ok(())
    }
}
