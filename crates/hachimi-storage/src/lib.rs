//! Storage layer for the hachimi engagement history.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for records and their secondary indexes
//! - Sign-biased score keys and zero-padded time keys for range scans
//! - Per-record read-modify-write committed as one `WriteBatch`
//! - Batched retention deletes

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{RecordTxn, Storage, StorageStats};
pub use error::StorageError;
pub use keys::{ScoreKey, UpdatedKey};
