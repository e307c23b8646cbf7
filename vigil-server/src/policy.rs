use std::sync::atomic::{AtomicU64, Ordering};

use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;
use vigil_core::{BoxStr, SensorPayload, StorageRecord, UpdateMessage};

use crate::convert;
use crate::storage::entities::{AlertSeverity, PolicyCondition, PolicyEntity};
use crate::storage::{Database, KeyValueStore};

/// Called by the dispatcher after a sample has been committed to storage.
///
/// Must not block and cannot fail the write, which has already happened.
pub trait PolicyHook: Send + Sync + 'static {
    fn on_stored(&self, record: &StorageRecord, update: &UpdateMessage);
}

pub struct NoopPolicyHook;

impl PolicyHook for NoopPolicyHook {
    fn on_stored(&self, _record: &StorageRecord, _update: &UpdateMessage) {}
}

#[derive(Debug, Clone)]
pub struct StoredSample {
    pub record: StorageRecord,
    pub update: UpdateMessage,
}

/// Hands stored samples to a [`PolicyEvaluator`] over a bounded channel.
/// When the evaluator falls behind, samples are dropped rather than stalling
/// the dispatcher.
#[derive(Debug)]
pub struct ChannelPolicyHook {
    tx: mpsc::Sender<StoredSample>,
    dropped: AtomicU64,
}

impl ChannelPolicyHook {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StoredSample>) {
        let (tx, rx) = mpsc::channel(capacity);
        let hook = Self {
            tx,
            dropped: AtomicU64::new(0),
        };
        (hook, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PolicyHook for ChannelPolicyHook {
    fn on_stored(&self, record: &StorageRecord, update: &UpdateMessage) {
        let sample = StoredSample {
            record: record.clone(),
            update: update.clone(),
        };

        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(sample)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(path = %sample.record.path, "Policy evaluator is behind, sample skipped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Policy evaluator stopped");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub policy_id: Ulid,
    pub path: BoxStr,
    pub severity: AlertSeverity,
    pub message: String,
    pub time: Timestamp,
}

fn numeric(payload: &SensorPayload) -> Option<f64> {
    match payload {
        SensorPayload::Int { value } => Some(*value as f64),
        SensorPayload::Double { value } => Some(*value),
        SensorPayload::IntBar(bar) => Some(bar.mean),
        SensorPayload::DoubleBar(bar) => Some(bar.mean),
        SensorPayload::Bool { .. } | SensorPayload::String { .. } => None,
    }
}

/// Whether `payload` satisfies `condition`. A condition that does not apply
/// to the payload's type never matches. Bars are judged by their mean.
pub fn condition_matches(condition: &PolicyCondition, payload: &SensorPayload) -> bool {
    match (condition, payload) {
        (PolicyCondition::Equals(expected), SensorPayload::Bool { value }) => value == expected,
        (PolicyCondition::Contains(needle), SensorPayload::String { value }) => {
            value.contains(&**needle)
        }
        (PolicyCondition::Above(limit), payload) => numeric(payload).is_some_and(|v| v > *limit),
        (PolicyCondition::Below(limit), payload) => numeric(payload).is_some_and(|v| v < *limit),
        _ => false,
    }
}

/// Checks stored samples against the policies of their sensor and emits an
/// [`AlertEvent`] for each match.
pub struct PolicyEvaluator<S> {
    db: Database<S>,
    samples: mpsc::Receiver<StoredSample>,
    alerts: mpsc::Sender<AlertEvent>,
}

impl<S: KeyValueStore> PolicyEvaluator<S> {
    pub fn new(
        db: Database<S>,
        samples: mpsc::Receiver<StoredSample>,
        alerts: mpsc::Sender<AlertEvent>,
    ) -> Self {
        Self {
            db,
            samples,
            alerts,
        }
    }

    pub async fn evaluate(&self, sample: &StoredSample) -> Vec<AlertEvent> {
        let policies = self.db.policies_for(&sample.record.path).await;
        if policies.is_empty() {
            return Vec::new();
        }

        let value = match convert::decode_record(&sample.record) {
            Ok(value) => value,
            Err(e) => {
                error!(path = %sample.record.path, error = %e, "Cannot evaluate policies");
                return Vec::new();
            }
        };

        policies
            .into_iter()
            .filter(|policy| condition_matches(&policy.condition, &value.data))
            .map(|policy| alert_for(&policy, sample))
            .collect()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Policy evaluator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Policy evaluator shutting down");
                    break;
                }
                sample = self.samples.recv() => {
                    let Some(sample) = sample else {
                        info!("Sample channel closed, stopping policy evaluator");
                        break;
                    };

                    for alert in self.evaluate(&sample).await {
                        if self.alerts.send(alert).await.is_err() {
                            warn!("Alert channel closed, stopping policy evaluator");
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn alert_for(policy: &PolicyEntity, sample: &StoredSample) -> AlertEvent {
    AlertEvent {
        policy_id: policy.id,
        path: sample.record.path.clone(),
        severity: policy.severity,
        message: format!(
            "{} matched {:?}",
            sample.update.short_value, policy.condition
        ),
        time: sample.record.time_collected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use vigil_core::{BarSummary, SensorValue};

    fn at(second: i64) -> Timestamp {
        Timestamp::from_second(second).unwrap()
    }

    fn stored(path: &str, data: SensorPayload) -> StoredSample {
        let value = SensorValue {
            path: path.into(),
            time: at(100),
            comment: None,
            data,
        };
        StoredSample {
            record: convert::to_storage_record(&value, at(101)).unwrap(),
            update: convert::to_update_message(&value, "shop", at(101)),
        }
    }

    #[test]
    fn conditions() {
        let bar = SensorPayload::IntBar(BarSummary {
            min: 0,
            max: 100,
            mean: 75.0,
            count: 4,
            start: at(0),
            end: at(60),
        });
        assert!(condition_matches(&PolicyCondition::Above(70.0), &bar));
        assert!(!condition_matches(&PolicyCondition::Below(70.0), &bar));
        assert!(condition_matches(
            &PolicyCondition::Equals(false),
            &SensorPayload::Bool { value: false }
        ));
        assert!(condition_matches(
            &PolicyCondition::Contains("err".into()),
            &SensorPayload::String {
                value: "disk error".into()
            }
        ));
        assert!(!condition_matches(
            &PolicyCondition::Above(1.0),
            &SensorPayload::String { value: "5".into() }
        ));
    }

    #[test]
    fn full_channel_drops_samples() {
        let (hook, _rx) = ChannelPolicyHook::new(1);
        let sample = stored("shop/cpu", SensorPayload::Int { value: 1 });

        hook.on_stored(&sample.record, &sample.update);
        hook.on_stored(&sample.record, &sample.update);
        assert_eq!(hook.dropped(), 1);
    }

    #[tokio::test]
    async fn evaluator_emits_alerts_for_matching_policies() {
        let db = Database::new(MemoryStore::new());
        let hot = PolicyEntity {
            id: Ulid::new(),
            sensor_path: "shop/cpu".into(),
            condition: PolicyCondition::Above(90.0),
            severity: AlertSeverity::Critical,
        };
        let cold = PolicyEntity {
            id: Ulid::new(),
            sensor_path: "shop/cpu".into(),
            condition: PolicyCondition::Below(5.0),
            severity: AlertSeverity::Info,
        };
        db.policies().create(&hot).await;
        db.policies().create(&cold).await;

        let (hook, samples) = ChannelPolicyHook::new(8);
        let (alerts_tx, mut alerts) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(PolicyEvaluator::new(db, samples, alerts_tx).run(cancel.clone()));

        let sample = stored("shop/cpu", SensorPayload::Double { value: 97.5 });
        hook.on_stored(&sample.record, &sample.update);

        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.policy_id, hot.id);
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(&*alert.path, "shop/cpu");
        assert!(alert.message.starts_with("Value = 97.5"));

        cancel.cancel();
        task.await.unwrap();
        assert!(alerts.try_recv().is_err());
    }
}
