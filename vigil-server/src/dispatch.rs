use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vigil_core::{SensorPath, SensorValue, UpdateMessage};

use crate::convert::{self, ConvertError};
use crate::policy::PolicyHook;
use crate::queue::IngestionQueue;
use crate::storage::{Database, KeyValueStore};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub interval_ms: u64,
    /// Samples buffered between the dispatcher and the policy evaluator.
    pub policy_channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            policy_channel_capacity: 1_024,
        }
    }
}

/// One accepted sample waiting in the ingestion queue.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub update: UpdateMessage,
    pub value: SensorValue,
    pub received_at: Timestamp,
}

impl Ingested {
    /// Validate `value` and prepare it for queueing.
    pub fn accept(value: SensorValue, received_at: Timestamp) -> Result<Self, ConvertError> {
        let path = convert::validate(&value)?;
        let update = convert::to_update_message(&value, path.product(), received_at);

        Ok(Self {
            update,
            value,
            received_at,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub drained: usize,
    pub stored: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error("storage dropped the write")]
    NotStored,
}

/// Moves queued samples into storage.
///
/// Each item is handled on its own: a sample that fails to convert or store
/// is logged and skipped, the rest of the batch carries on. Failed items are
/// not retried here.
pub struct Dispatcher<S, P> {
    queue: Arc<IngestionQueue<Ingested>>,
    db: Database<S>,
    hook: P,
}

impl<S, P> Dispatcher<S, P>
where
    S: KeyValueStore,
    P: PolicyHook,
{
    pub fn new(queue: Arc<IngestionQueue<Ingested>>, db: Database<S>, hook: P) -> Self {
        Self { queue, db, hook }
    }

    async fn dispatch(&self, item: &Ingested) -> Result<(), DispatchError> {
        let path = SensorPath::parse(&item.update.path).map_err(ConvertError::from)?;
        let record = convert::to_storage_record(&item.value, item.received_at)?;

        if !self.db.put_value(&record).await {
            return Err(DispatchError::NotStored);
        }
        // the sample itself is committed; a dropped registry refresh is
        // already counted as a storage fault
        self.db
            .register_sensor(&path, record.data_type, item.received_at)
            .await;

        self.hook.on_stored(&record, &item.update);
        Ok(())
    }

    /// Drain one batch and dispatch every item in it.
    pub async fn process_batch(&self) -> BatchReport {
        let batch = self.queue.drain_batch();
        let mut report = BatchReport {
            drained: batch.len(),
            ..BatchReport::default()
        };

        for item in &batch {
            match self.dispatch(item).await {
                Ok(()) => {
                    report.stored += 1;
                    debug!(path = %item.update.path, short_value = %item.update.short_value, "Dispatched");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(path = %item.update.path, error = %e, "Failed to dispatch sample");
                }
            }
        }

        report
    }

    /// Drain batches until one comes back short of a full batch.
    pub async fn process_backlog(&self) -> BatchReport {
        let full = self.queue.config().batch_size.max(1);
        let mut total = BatchReport::default();

        loop {
            let report = self.process_batch().await;
            total.drained += report.drained;
            total.stored += report.stored;
            total.failed += report.failed;
            if report.drained < full {
                return total;
            }
        }
    }

    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        // a zero period would make the interval panic
        let mut interval = tokio::time::interval(interval.max(Duration::from_millis(1)));
        info!("Dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // whatever was accepted before shutdown still gets stored
                    loop {
                        let report = self.process_batch().await;
                        if report.drained == 0 {
                            break;
                        }
                    }
                    info!("Dispatcher shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.process_backlog().await;
                    if report.drained > 0 {
                        debug!(
                            drained = report.drained,
                            stored = report.stored,
                            failed = report.failed,
                            queue_len = self.queue.len(),
                            "Batch dispatched"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ChannelPolicyHook, NoopPolicyHook};
    use crate::queue::QueueConfig;
    use crate::storage::MemoryStore;
    use vigil_core::{ActionType, SensorPayload};

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn sample(path: &str, second: i64, data: SensorPayload) -> SensorValue {
        SensorValue {
            path: path.into(),
            time: at(second),
            comment: None,
            data,
        }
    }

    #[test]
    fn accept_rejects_invalid_paths() {
        let value = sample("orphan", 1, SensorPayload::Int { value: 1 });
        assert!(matches!(
            Ingested::accept(value, at(2)),
            Err(ConvertError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn bool_sample_flows_into_storage() {
        let queue = Arc::new(IngestionQueue::new(QueueConfig::default()));
        let db = Database::new(MemoryStore::new());
        let (hook, mut stored) = ChannelPolicyHook::new(4);
        let dispatcher = Dispatcher::new(Arc::clone(&queue), db.clone(), hook);

        let value = sample("demoProduct/health", 1_700_000_000, SensorPayload::Bool { value: true });
        let item = Ingested::accept(value, at(1_700_000_005)).unwrap();
        assert_eq!(&*item.update.short_value, "Value = True");
        assert_eq!(item.update.action, ActionType::Add);
        queue.enqueue(item);

        let report = dispatcher.process_batch().await;
        assert_eq!(report, BatchReport { drained: 1, stored: 1, failed: 0 });

        let record = db.latest_value("demoProduct/health").await.unwrap();
        assert_eq!(record.timestamp, 1_700_000_000);
        assert_eq!(db.products().list().await, vec![Box::from("demoProduct")]);

        let handed_over = stored.try_recv().unwrap();
        assert_eq!(handed_over.record, record);
    }

    #[tokio::test]
    async fn one_bad_item_does_not_sink_the_batch() {
        let queue = Arc::new(IngestionQueue::new(QueueConfig::default()));
        let db = Database::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(Arc::clone(&queue), db.clone(), NoopPolicyHook);

        queue.enqueue(
            Ingested::accept(sample("shop/a", 1, SensorPayload::Int { value: 1 }), at(1)).unwrap(),
        );
        // skipped validation on purpose
        let mut broken =
            Ingested::accept(sample("shop/b", 2, SensorPayload::Int { value: 2 }), at(2)).unwrap();
        broken.update.path = "nope".into();
        queue.enqueue(broken);
        queue.enqueue(
            Ingested::accept(sample("shop/c", 3, SensorPayload::Int { value: 3 }), at(3)).unwrap(),
        );

        let report = dispatcher.process_batch().await;
        assert_eq!(report, BatchReport { drained: 3, stored: 2, failed: 1 });
        assert!(db.latest_value("shop/a").await.is_some());
        assert!(db.latest_value("shop/c").await.is_some());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn shutdown_flushes_the_queue() {
        let queue = Arc::new(IngestionQueue::new(QueueConfig {
            batch_size: 2,
            ..QueueConfig::default()
        }));
        let db = Database::new(MemoryStore::new());
        for second in 0..5 {
            queue.enqueue(
                Ingested::accept(
                    sample("shop/hits", second, SensorPayload::Int { value: second }),
                    at(10),
                )
                .unwrap(),
            );
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        Dispatcher::new(Arc::clone(&queue), db.clone(), NoopPolicyHook)
            .run(Duration::from_secs(3_600), cancel)
            .await;

        assert!(queue.is_empty());
        assert_eq!(db.history("shop/hits", at(0), at(10), None).await.len(), 5);
    }

    fn hits(queue: &IngestionQueue<Ingested>, count: i64) {
        for second in 0..count {
            queue.enqueue(
                Ingested::accept(
                    sample("shop/hits", second, SensorPayload::Int { value: second }),
                    at(100),
                )
                .unwrap(),
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_is_cleared_within_one_tick() {
        let queue = Arc::new(IngestionQueue::new(QueueConfig {
            batch_size: 10,
            ..QueueConfig::default()
        }));
        let db = Database::new(MemoryStore::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&queue), db.clone(), NoopPolicyHook)
                .run(Duration::from_secs(1), cancel.clone()),
        );
        // let the immediate first tick pass on an empty queue
        tokio::time::sleep(Duration::from_millis(100)).await;
        hits(&queue, 50);

        tokio::time::sleep(Duration::from_millis(1_400)).await;
        assert!(queue.is_empty());
        assert_eq!(db.history("shop/hits", at(0), at(100), None).await.len(), 50);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn backlog_report_sums_every_batch() {
        let queue = Arc::new(IngestionQueue::new(QueueConfig {
            batch_size: 4,
            ..QueueConfig::default()
        }));
        let db = Database::new(MemoryStore::new());
        hits(&queue, 10);

        let report = Dispatcher::new(Arc::clone(&queue), db, NoopPolicyHook)
            .process_backlog()
            .await;
        assert_eq!(report, BatchReport { drained: 10, stored: 10, failed: 0 });
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_does_not_panic() {
        let queue = Arc::new(IngestionQueue::new(QueueConfig::default()));
        let db = Database::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        hits(&queue, 3);

        let task = tokio::spawn(
            Dispatcher::new(Arc::clone(&queue), db.clone(), NoopPolicyHook)
                .run(Duration::ZERO, cancel.clone()),
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(queue.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }
}
