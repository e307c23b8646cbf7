use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::storage::{KeyValueStore, Scan, StoreError};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory ordered store.
/// This is primarily intended for testing and as a reference
/// implementation of the KeyValueStore trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    map: Arc<RwLock<Map>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot written by [`KeyValueStore::backup`].
    pub async fn load_backup(path: &Path) -> Result<Self, StoreError> {
        let bytes = tokio::fs::read(path).await?;
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = serde_json::from_slice(&bytes)?;

        Ok(Self {
            map: Arc::new(RwLock::new(pairs.into_iter().collect())),
        })
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
        Ok(())
    }

    async fn scan(&self, scan: Scan<'_>) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);

        let upper = match scan.end {
            Some(end) if end <= scan.start => return Ok(Vec::new()),
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        let range = map.range::<[u8], _>((Bound::Included(scan.start), upper));
        let limit = scan.limit.unwrap_or(usize::MAX);

        let pairs = if scan.reverse {
            range
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            range
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        Ok(pairs)
    }

    async fn backup(&self, destination: &Path) -> Result<(), StoreError> {
        // copy under the read lock, write outside of it
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = {
            let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let bytes = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(destination, bytes).await?;
        Ok(())
    }

    fn backup_extension(&self) -> &'static str {
        "json"
    }
}
