//! Sensor value history.
//!
//! Every stored sample lives under
//! `value:<path>\0<seconds:16 hex><nanos:8 hex>`, where the seconds are the
//! record's floored Unix time with the sign bit flipped so that byte order
//! matches time order, pre-epoch samples included. A prefix scan over
//! `value:<path>\0` therefore walks one sensor's history oldest first.

use jiff::Timestamp;
use tracing::{debug, error};
use vigil_core::{StorageRecord, unix_floor_seconds};

use crate::storage::{Database, KeyValueStore, Scan, StoreError, prefix_end};

const VALUE_PREFIX: &[u8] = b"value:";
const SEPARATOR: u8 = 0;

/// Every history key of `path` starts with this. A path containing the
/// separator byte would overlap another sensor's keys and is refused.
pub fn history_prefix(path: &str) -> Result<Vec<u8>, StoreError> {
    if path.as_bytes().contains(&SEPARATOR) {
        return Err(StoreError::InvalidKey(path.to_owned()));
    }

    let mut key = Vec::with_capacity(VALUE_PREFIX.len() + path.len() + 1);
    key.extend_from_slice(VALUE_PREFIX);
    key.extend_from_slice(path.as_bytes());
    key.push(SEPARATOR);
    Ok(key)
}

fn sortable_seconds(seconds: i64) -> u64 {
    (seconds as u64) ^ (1 << 63)
}

fn key_at(path: &str, seconds: i64, nanos: u32) -> Result<Vec<u8>, StoreError> {
    let mut key = history_prefix(path)?;
    key.extend_from_slice(format!("{:016x}{:08x}", sortable_seconds(seconds), nanos).as_bytes());
    Ok(key)
}

/// History key of one sample taken at `time`.
pub fn history_key(path: &str, time: Timestamp) -> Result<Vec<u8>, StoreError> {
    let seconds = unix_floor_seconds(time);
    let nanos = match time.subsec_nanosecond() {
        n if n < 0 => n + 1_000_000_000,
        n => n,
    };
    key_at(path, seconds, nanos as u32)
}

impl<S: KeyValueStore> Database<S> {
    /// Append `record` to its sensor's history. Two samples of one sensor
    /// taken at the same instant share a key; the later write wins.
    pub async fn put_value(&self, record: &StorageRecord) -> bool {
        let result: Result<(), StoreError> = async {
            let bytes = serde_json::to_vec(record)?;
            self.store
                .put(&history_key(&record.path, record.time)?, &bytes)
                .await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(path = %record.path, timestamp = record.timestamp, "Value stored");
                true
            }
            Err(e) => {
                self.value_fault("put_value", &record.path, &e);
                false
            }
        }
    }

    /// Newest stored sample of `path`.
    pub async fn latest_value(&self, path: &str) -> Option<StorageRecord> {
        let result: Result<Vec<StorageRecord>, StoreError> = async {
            let prefix = history_prefix(path)?;
            let end = prefix_end(&prefix);
            self.try_scan_records(Scan {
                start: &prefix,
                end: end.as_deref(),
                limit: Some(1),
                reverse: true,
            })
            .await
        }
        .await;

        match result {
            Ok(mut records) => records.pop(),
            Err(e) => {
                self.value_fault("latest_value", path, &e);
                None
            }
        }
    }

    /// Samples of `path` whose whole-second `timestamp` lies in
    /// `[from, to)`, oldest first, at most `limit` of them.
    pub async fn history(
        &self,
        path: &str,
        from: Timestamp,
        to: Timestamp,
        limit: Option<usize>,
    ) -> Vec<StorageRecord> {
        let result: Result<Vec<StorageRecord>, StoreError> = async {
            let start = key_at(path, unix_floor_seconds(from), 0)?;
            let end = key_at(path, unix_floor_seconds(to), 0)?;
            self.try_scan_records(Scan {
                start: &start,
                end: Some(&end),
                limit,
                reverse: false,
            })
            .await
        }
        .await;

        match result {
            Ok(records) => records,
            Err(e) => {
                self.value_fault("history", path, &e);
                Vec::new()
            }
        }
    }

    /// Drop the whole history of `path`. Returns how many samples were removed.
    pub async fn remove_values(&self, path: &str) -> usize {
        let result: Result<usize, StoreError> = async {
            let prefix = history_prefix(path)?;
            let end = prefix_end(&prefix);
            let pairs = self
                .store
                .scan(Scan {
                    start: &prefix,
                    end: end.as_deref(),
                    limit: None,
                    reverse: false,
                })
                .await?;

            for (key, _) in &pairs {
                self.store.delete(key).await?;
            }
            Ok(pairs.len())
        }
        .await;

        match result {
            Ok(removed) => removed,
            Err(e) => {
                self.value_fault("remove_values", path, &e);
                0
            }
        }
    }

    async fn try_scan_records(&self, scan: Scan<'_>) -> Result<Vec<StorageRecord>, StoreError> {
        self.store
            .scan(scan)
            .await?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .collect()
    }

    fn value_fault(&self, op: &str, path: &str, e: &StoreError) {
        self.faults.record();
        error!(op, path = %path, error = %e, "Value history operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sort_in_time_order() {
        let times = [
            Timestamp::from_second(-86_400).unwrap(),
            Timestamp::new(-1, -500_000_000).unwrap(),
            Timestamp::UNIX_EPOCH,
            Timestamp::new(0, 1).unwrap(),
            Timestamp::from_second(1_700_000_000).unwrap(),
            Timestamp::new(1_700_000_000, 999_999_999).unwrap(),
        ];

        let keys: Vec<_> = times
            .iter()
            .map(|t| history_key("shop/cpu", *t).unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn prefix_does_not_match_longer_paths() {
        let key = history_key("shop/cpu_total", Timestamp::UNIX_EPOCH).unwrap();
        assert!(!key.starts_with(&history_prefix("shop/cpu").unwrap()));
        assert!(key.starts_with(&history_prefix("shop/cpu_total").unwrap()));
    }

    #[test]
    fn separator_in_path_is_refused() {
        assert!(matches!(
            history_prefix("shop/cpu\0zz"),
            Err(StoreError::InvalidKey(_))
        ));
    }
}
