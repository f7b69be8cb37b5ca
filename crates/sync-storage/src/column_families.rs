//! Column family definitions for RocksDB.
//!
//! - jobs: pending and claimed queue rows (FIFO by key)
//! - jobs_archive: finished jobs kept for audit and statistics
//! - meta: counters that must survive restarts

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for pending/claimed jobs
pub const CF_JOBS: &str = "jobs";

/// Column family name for archived jobs
pub const CF_JOBS_ARCHIVE: &str = "jobs_archive";

/// Column family name for counters
pub const CF_META: &str = "meta";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_JOBS, CF_JOBS_ARCHIVE, CF_META];

/// Archive rows are written once and read rarely
fn archive_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_JOBS, Options::default()),
        ColumnFamilyDescriptor::new(CF_JOBS_ARCHIVE, archive_options()),
        ColumnFamilyDescriptor::new(CF_META, Options::default()),
    ]
}
