use std::path::Path;

use serde::Deserialize;

use crate::transport::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the vigil-server HTTP API
    pub url: String,
    /// Capacity of the channel between sensors and delivery
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

/// A simulated sensor driven by random samples.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub path: String,
    pub kind: SensorKind,
    /// Interval in milliseconds between samples
    pub interval_ms: u64,
    /// Window length in seconds, bar sensors only
    pub bar_period_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Bool,
    Int,
    Double,
    String,
    IntBar,
    DoubleBar,
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> color_eyre::Result<()> {
        if self.server.channel_capacity == 0 {
            return Err(color_eyre::eyre::eyre!("server.channel_capacity must be positive"));
        }
        for sensor in &self.sensors {
            if sensor.interval_ms == 0 || sensor.bar_period_secs == Some(0) {
                return Err(color_eyre::eyre::eyre!(
                    "sensor '{}' needs positive interval_ms and bar_period_secs",
                    sensor.path
                ));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: "http://127.0.0.1:8080".to_string(),
                channel_capacity: default_channel_capacity(),
            },
            retry: RetryPolicy::default(),
            sensors: vec![
                SensorConfig {
                    path: "demoProduct/health".to_string(),
                    kind: SensorKind::Bool,
                    interval_ms: 5_000,
                    bar_period_secs: None,
                },
                SensorConfig {
                    path: "demoProduct/system/cpu".to_string(),
                    kind: SensorKind::DoubleBar,
                    interval_ms: 500,
                    bar_period_secs: Some(30),
                },
                SensorConfig {
                    path: "demoProduct/system/threads".to_string(),
                    kind: SensorKind::IntBar,
                    interval_ms: 1_000,
                    bar_period_secs: Some(60),
                },
            ],
        }
    }
}
