pub mod collection;
pub mod database;
pub mod entities;
pub mod memory;
pub mod sqlite;
pub mod values;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

pub use collection::{Collection, Entity};
pub use database::Database;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid key component {0:?}")]
    InvalidKey(String),
}

/// A key range to read, `[start, end)` in byte order.
#[derive(Debug, Clone, Copy)]
pub struct Scan<'a> {
    pub start: &'a [u8],
    /// `None` reads to the end of the keyspace.
    pub end: Option<&'a [u8]>,
    pub limit: Option<usize>,
    /// Walk the range from the highest key down.
    pub reverse: bool,
}

/// Smallest key greater than every key starting with `prefix`, or `None` if
/// no such key exists (the prefix is all `0xff`).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// An ordered key-value store with atomic single-key writes.
///
/// Implementations must tolerate concurrent callers. Concurrent writes to the
/// same key are last-write-wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    async fn scan(&self, scan: Scan<'_>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Write a consistent snapshot of the whole store to `destination`.
    async fn backup(&self, destination: &Path) -> Result<(), StoreError>;

    /// File extension used for snapshots of this store.
    fn backup_extension(&self) -> &'static str;
}

/// Counts storage operations that failed and were downgraded to "no data" or
/// a dropped write. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct StorageFaults(Arc<AtomicU64>);

impl StorageFaults {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_byte() {
        assert_eq!(prefix_end(b"abc"), Some(b"abd".to_vec()));
        assert_eq!(prefix_end(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
        assert_eq!(prefix_end(b""), None);
    }

    #[test]
    fn fault_counter_is_shared_between_clones() {
        let faults = StorageFaults::default();
        let other = faults.clone();
        faults.record();
        other.record();
        assert_eq!(faults.count(), 2);
    }
}
