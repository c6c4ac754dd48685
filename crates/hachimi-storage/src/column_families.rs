//! Column family definitions for RocksDB.
//!
//! - items: Content records keyed by id
//! - by_score: Secondary index ordered by signal score
//! - by_last_updated: Secondary index ordered by last update time
//!
//! Index entries carry the record id in the key and an empty value, so
//! range scans yield key sets without loading records.

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for content records
pub const CF_ITEMS: &str = "items";

/// Column family name for the score index
pub const CF_SCORE_INDEX: &str = "by_score";

/// Column family name for the last-updated index
pub const CF_UPDATED_INDEX: &str = "by_last_updated";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_ITEMS, CF_SCORE_INDEX, CF_UPDATED_INDEX];

/// Records carry excerpts and full text; compress them.
fn items_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ITEMS, items_options()),
        ColumnFamilyDescriptor::new(CF_SCORE_INDEX, Options::default()),
        ColumnFamilyDescriptor::new(CF_UPDATED_INDEX, Options::default()),
    ]
}
