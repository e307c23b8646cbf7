use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{BarSummary, BoxStr, SensorPayload, SensorValue};

/// Numeric types a bar sensor can aggregate.
pub trait BarValue: Copy + PartialOrd + Send + 'static {
    fn as_f64(self) -> f64;

    /// Whether the sample can take part in min/max/mean at all.
    fn is_valid(self) -> bool;

    fn into_payload(summary: BarSummary<Self>) -> SensorPayload;
}

impl BarValue for i64 {
    fn as_f64(self) -> f64 {
        self as f64
    }

    fn is_valid(self) -> bool {
        true
    }

    fn into_payload(summary: BarSummary<Self>) -> SensorPayload {
        SensorPayload::IntBar(summary)
    }
}

impl BarValue for f64 {
    fn as_f64(self) -> f64 {
        self
    }

    fn is_valid(self) -> bool {
        !self.is_nan()
    }

    fn into_payload(summary: BarSummary<Self>) -> SensorPayload {
        SensorPayload::DoubleBar(summary)
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator<T> {
    min: T,
    max: T,
    mean: f64,
    count: u64,
}

#[derive(Debug)]
struct Window<T> {
    start: Timestamp,
    acc: Option<Accumulator<T>>,
}

impl<T: BarValue> Window<T> {
    fn open(start: Timestamp) -> Self {
        Self { start, acc: None }
    }

    fn fold(&mut self, sample: T) {
        match &mut self.acc {
            None => {
                self.acc = Some(Accumulator {
                    min: sample,
                    max: sample,
                    mean: sample.as_f64(),
                    count: 1,
                })
            }
            Some(acc) => {
                acc.count += 1;
                if sample < acc.min {
                    acc.min = sample;
                }
                if sample > acc.max {
                    acc.max = sample;
                }
                // incremental mean, never materializes the running sum
                acc.mean += (sample.as_f64() - acc.mean) / acc.count as f64;
            }
        }
    }
}

/// A sensor that reports min/mean/max/count over a time window.
///
/// Every instance owns its own window behind its own lock, so sensors never
/// contend with each other. An empty window is never emitted: [`flush`]
/// returns `None` and just restarts the window.
///
/// [`flush`]: BarSensor::flush
#[derive(Debug)]
pub struct BarSensor<T> {
    path: BoxStr,
    window: Mutex<Window<T>>,
}

impl<T: BarValue> BarSensor<T> {
    pub fn new(path: impl Into<BoxStr>) -> Self {
        Self::starting_at(path, Timestamp::now())
    }

    pub fn starting_at(path: impl Into<BoxStr>, start: Timestamp) -> Self {
        Self {
            path: path.into(),
            window: Mutex::new(Window::open(start)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fold one sample into the open window. NaN samples are dropped.
    pub fn add_value(&self, sample: T) {
        if !sample.is_valid() {
            debug!(path = %self.path, "Ignoring invalid bar sample");
            return;
        }

        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.fold(sample);
    }

    /// Number of samples in the open window.
    pub fn pending(&self) -> u64 {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.acc.map_or(0, |acc| acc.count)
    }

    pub fn flush(&self) -> Option<BarSummary<T>> {
        self.flush_at(Timestamp::now())
    }

    /// Close the open window at `now` and start a new one at the same instant.
    pub fn flush_at(&self, now: Timestamp) -> Option<BarSummary<T>> {
        let closed = {
            let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *window, Window::open(now))
        };

        closed.acc.map(|acc| BarSummary {
            min: acc.min,
            max: acc.max,
            mean: acc.mean,
            count: acc.count,
            start: closed.start,
            end: now,
        })
    }

    /// Close the window and wrap the summary in a wire value stamped with the
    /// window's close time.
    pub fn flush_value(&self) -> Option<SensorValue> {
        self.flush().map(|summary| SensorValue {
            path: self.path.clone(),
            time: summary.end,
            comment: None,
            data: T::into_payload(summary),
        })
    }
}

/// Close `sensor`'s window every `period` and forward each non-empty summary.
///
/// On cancellation the partially filled window is flushed one last time.
pub async fn run_bar_sensor<T: BarValue>(
    sensor: Arc<BarSensor<T>>,
    period: Duration,
    tx: mpsc::Sender<SensorValue>,
    cancel: CancellationToken,
) {
    // a zero period would make the interval panic
    let period = period.max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately
    interval.tick().await;

    info!(path = %sensor.path(), period_secs = period.as_secs(), "Bar sensor started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(value) = sensor.flush_value() {
                    if let Err(e) = tx.try_send(value) {
                        warn!(path = %sensor.path(), error = %e, "Dropping final bar window");
                    }
                }
                info!(path = %sensor.path(), "Bar sensor shutting down");
                break;
            }
            _ = interval.tick() => {
                let Some(value) = sensor.flush_value() else {
                    debug!(path = %sensor.path(), "Empty bar window, nothing to send");
                    continue;
                };

                if tx.send(value).await.is_err() {
                    warn!(path = %sensor.path(), "Delivery channel closed, stopping bar sensor");
                    break;
                }
            }
        }
    }
}
