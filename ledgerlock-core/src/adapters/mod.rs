//! Adapter implementations
//!
//! Adapters implement the `AccountStore` port with concrete technologies:
//! - In-process map for tests and demonstrations
//! - DuckDB for durable storage
//!
//! Both share the per-key hold table in `key_locks`.

pub mod duckdb;
pub mod key_locks;
pub mod memory;
