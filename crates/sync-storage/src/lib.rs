//! Storage layer for the catalog sync job queue.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for pending jobs and the archive
//! - Zero-padded sequence keys so iteration order is insertion order
//! - Atomic claim of unclaimed jobs under concurrent runners
//! - Single-row writes for complete / release / archive

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{QueueStats, Storage};
pub use error::StorageError;
pub use keys::{ArchiveKey, JobKey};
