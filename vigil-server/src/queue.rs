use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub warning_threshold: usize,
    pub overflow_threshold: usize,
    /// Most items a single [`IngestionQueue::drain_batch`] returns.
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 5_000,
            overflow_threshold: 10_000,
            batch_size: 1_000,
        }
    }
}

/// Raised when an enqueue brings the depth up to a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum QueueSignal {
    Warning { depth: usize },
    Overflow { depth: usize },
}

const SIGNAL_CAPACITY: usize = 64;

/// Unbounded FIFO between the ingestion endpoint and the dispatcher.
///
/// `enqueue` never blocks or refuses an item. Capacity pressure is reported
/// instead: crossing a watermark publishes a [`QueueSignal`] to subscribers
/// and bumps a counter that can be polled.
#[derive(Debug)]
pub struct IngestionQueue<T> {
    items: Mutex<VecDeque<T>>,
    config: QueueConfig,
    signals: broadcast::Sender<QueueSignal>,
    warnings: AtomicU64,
    overflows: AtomicU64,
}

impl<T> IngestionQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            items: Mutex::new(VecDeque::new()),
            config,
            signals,
            warnings: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append `item` and return the depth right after it.
    pub fn enqueue(&self, item: T) -> usize {
        let depth = {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            items.push_back(item);
            items.len()
        };

        if depth == self.config.warning_threshold {
            self.warnings.fetch_add(1, Ordering::Relaxed);
            // no subscribers is fine
            let _ = self.signals.send(QueueSignal::Warning { depth });
        }
        if depth == self.config.overflow_threshold {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            let _ = self.signals.send(QueueSignal::Overflow { depth });
        }

        depth
    }

    /// Take up to `batch_size` items from the front. Empty when there is no
    /// work.
    pub fn drain_batch(&self) -> Vec<T> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let take = items.len().min(self.config.batch_size.max(1));
        items.drain(..take).collect()
    }

    /// Drop every pending item and return how many there were.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = items.len();
        items.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueSignal> {
        self.signals.subscribe()
    }

    pub fn warning_count(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}
