use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_core::{SensorPayload, SensorValue};

use crate::bar::{BarSensor, BarValue, run_bar_sensor};
use crate::config::{SensorConfig, SensorKind};

const DEFAULT_BAR_PERIOD: Duration = Duration::from_secs(60);

const STATUS_WORDS: [&str; 4] = ["ok", "degraded", "recovering", "maintenance"];

/// Sensors that produce random samples, used to exercise a server without
/// real instrumentation.
pub struct MockSensors {
    sensors: Vec<SensorConfig>,
}

impl MockSensors {
    pub fn new(sensors: Vec<SensorConfig>) -> Self {
        Self { sensors }
    }

    /// Spawn one sampling task per sensor (plus a flushing task per bar
    /// sensor). All tasks stop when `cancel` fires.
    pub fn start(
        &self,
        tx: mpsc::Sender<SensorValue>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for sensor in &self.sensors {
            let interval = Duration::from_millis(sensor.interval_ms.max(1));
            let period = sensor
                .bar_period_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BAR_PERIOD);

            match sensor.kind {
                SensorKind::IntBar => {
                    let bar = Arc::new(BarSensor::<i64>::new(sensor.path.as_str()));
                    handles.push(tokio::spawn(sample_bar(
                        Arc::clone(&bar),
                        interval,
                        cancel.clone(),
                        |rng| rng.random_range(0..500),
                    )));
                    handles.push(tokio::spawn(run_bar_sensor(
                        bar,
                        period,
                        tx.clone(),
                        cancel.clone(),
                    )));
                }
                SensorKind::DoubleBar => {
                    let bar = Arc::new(BarSensor::<f64>::new(sensor.path.as_str()));
                    handles.push(tokio::spawn(sample_bar(
                        Arc::clone(&bar),
                        interval,
                        cancel.clone(),
                        |rng| rng.random_range(0.0..100.0),
                    )));
                    handles.push(tokio::spawn(run_bar_sensor(
                        bar,
                        period,
                        tx.clone(),
                        cancel.clone(),
                    )));
                }
                kind => {
                    handles.push(tokio::spawn(sample_instant(
                        sensor.path.clone(),
                        kind,
                        interval,
                        tx.clone(),
                        cancel.clone(),
                    )));
                }
            }

            info!(path = %sensor.path, kind = ?sensor.kind, "Mock sensor started");
        }

        handles
    }
}

async fn sample_bar<T, G>(
    bar: Arc<BarSensor<T>>,
    interval: Duration,
    cancel: CancellationToken,
    generate: G,
) where
    T: BarValue,
    G: Fn(&mut rand::rngs::ThreadRng) -> T,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let sample = generate(&mut rand::rng());
                bar.add_value(sample);
            }
        }
    }
}

async fn sample_instant(
    path: String,
    kind: SensorKind,
    interval: Duration,
    tx: mpsc::Sender<SensorValue>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let value = SensorValue {
                    path: path.as_str().into(),
                    time: jiff::Timestamp::now(),
                    comment: None,
                    data: random_payload(kind),
                };

                if tx.send(value).await.is_err() {
                    warn!(path = %path, "Delivery channel closed, stopping mock sensor");
                    break;
                }
            }
        }
    }
}

fn random_payload(kind: SensorKind) -> SensorPayload {
    let mut rng = rand::rng();

    match kind {
        SensorKind::Bool => SensorPayload::Bool {
            value: rng.random_bool(0.9),
        },
        SensorKind::Int => SensorPayload::Int {
            value: rng.random_range(-1_000..1_000),
        },
        SensorKind::Double => SensorPayload::Double {
            value: rng.random_range(-50.0..50.0),
        },
        SensorKind::String => {
            let word = STATUS_WORDS[rng.random_range(0..STATUS_WORDS.len())];
            SensorPayload::String { value: word.into() }
        }
        // bar kinds are summarized by a BarSensor instead
        SensorKind::IntBar | SensorKind::DoubleBar => SensorPayload::Int {
            value: rng.random_range(0..500),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::SensorType;

    #[test]
    fn random_payload_matches_kind() {
        assert_eq!(random_payload(SensorKind::Bool).sensor_type(), SensorType::Bool);
        assert_eq!(random_payload(SensorKind::Double).sensor_type(), SensorType::Double);
        match random_payload(SensorKind::String) {
            SensorPayload::String { value } => assert!(STATUS_WORDS.contains(&&*value)),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn instant_sensors_feed_the_channel() {
        let mocks = MockSensors::new(vec![SensorConfig {
            path: "demo/flag".into(),
            kind: SensorKind::Bool,
            interval_ms: 100,
            bar_period_secs: None,
        }]);
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let handles = mocks.start(tx, cancel.clone());
        let value = rx.recv().await.unwrap();
        assert_eq!(&*value.path, "demo/flag");
        assert_eq!(value.sensor_type(), SensorType::Bool);

        cancel.cancel();
        for h in handles {
            h.await.unwrap();
        }
    }
}
