pub mod bar;
pub mod client;
pub mod config;
pub mod mock;
pub mod transport;

pub use bar::{BarSensor, BarValue, run_bar_sensor};
pub use client::{HttpSender, SendError, run_delivery};
pub use config::{Config, SensorConfig, SensorKind, ServerConfig};
pub use mock::MockSensors;
pub use transport::{DeliveryError, Failure, Outcome, RetryPolicy, send_with_retry};
