//! RocksDB storage backend for the HLV node.

use anyhow::Result;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;

/// One durable record per swap, JSON.
pub const CF_SWAPS: &str = "swaps";
/// Append-only status log keyed by `swap_id ‖ sequence`.
pub const CF_TRANSITIONS: &str = "transitions";
/// Idempotency records keyed by `swap_id ‖ step`.
pub const CF_STEPS: &str = "steps";
/// Payment hash -> non-terminal swap bound to it.
pub const CF_PAYMENT_HASHES: &str = "payment_hashes";
/// Scheduler journal keyed by job id.
pub const CF_JOBS: &str = "jobs";

const COLUMN_FAMILIES: [&str; 5] = [CF_SWAPS, CF_TRANSITIONS, CF_STEPS, CF_PAYMENT_HASHES, CF_JOBS];

/// A write applied as part of an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        cf: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: &'static str,
        key: Vec<u8>,
    },
}

/// RocksDB-backed storage for the HLV node.
pub struct Storage {
    db: DB,
}

impl Storage {
    /// Open or create a RocksDB database at the given path with column families.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)?;
        tracing::info!(path = %path.display(), "storage opened");

        Ok(Self { db })
    }

    fn cf(&self, cf_name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(cf_name)
            .ok_or_else(|| anyhow::anyhow!("column family '{}' not found", cf_name))
    }

    /// Put a value into a column family.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(&cf, key, value)?;
        Ok(())
    }

    /// Get a value from a column family.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        let value = self.db.get_cf(&cf, key)?;
        Ok(value)
    }

    /// Delete a key from a column family.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.delete_cf(&cf, key)?;
        Ok(())
    }

    /// Every entry whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.into_vec(), value.into_vec()));
        }
        Ok(entries)
    }

    /// Every value in a column family.
    pub fn scan_all(&self, cf_name: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .scan_prefix(cf_name, &[])?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Apply all `ops` atomically.
    pub fn write(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { cf, key, value } => batch.put_cf(self.cf(cf)?, key, value),
                BatchOp::Delete { cf, key } => batch.delete_cf(self.cf(cf)?, key),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn temp_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("hlv-test-{}", rand::random::<u64>()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
