use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dispatch::DispatchConfig;
use crate::queue::QueueConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub backup: Option<BackupConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Deserialize)]
pub struct BackupConfig {
    /// Directory that receives the snapshots
    pub dir: PathBuf,
    /// Seconds between two snapshots
    pub interval_secs: u64,
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> color_eyre::Result<()> {
        if self.dispatch.interval_ms == 0 {
            return Err(color_eyre::eyre::eyre!("dispatch.interval_ms must be positive"));
        }
        if self.queue.batch_size == 0 {
            return Err(color_eyre::eyre::eyre!("queue.batch_size must be positive"));
        }
        if self.backup.as_ref().is_some_and(|b| b.interval_secs == 0) {
            return Err(color_eyre::eyre::eyre!("backup.interval_secs must be positive"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            },
            storage: StorageConfig::Memory,
            queue: QueueConfig::default(),
            dispatch: DispatchConfig::default(),
            backup: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            http_addr = "127.0.0.1:9090"

            [storage]
            type = "sqlite"
            path = "/var/lib/vigil/vigil.db"

            [queue]
            warning_threshold = 10
            overflow_threshold = 20

            [dispatch]
            interval_ms = 100

            [backup]
            dir = "/var/backups/vigil"
            interval_secs = 3600
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_addr.port(), 9090);
        assert!(matches!(config.storage, StorageConfig::Sqlite { .. }));
        assert_eq!(config.queue.warning_threshold, 10);
        assert_eq!(config.queue.batch_size, 1_000);
        assert_eq!(config.dispatch.interval_ms, 100);
        assert_eq!(config.dispatch.policy_channel_capacity, 1_024);
        assert_eq!(config.backup.unwrap().interval_secs, 3600);
    }

    #[test]
    fn optional_sections_default() {
        let config: Config = toml::from_str(
            r#"
            [server]
            http_addr = "0.0.0.0:8080"

            [storage]
            type = "memory"
            "#,
        )
        .unwrap();

        assert!(config.backup.is_none());
        assert_eq!(config.queue.overflow_threshold, 10_000);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let parse = |extra: &str| -> Config {
            toml::from_str(&format!(
                "[server]\nhttp_addr = \"0.0.0.0:8080\"\n[storage]\ntype = \"memory\"\n{extra}"
            ))
            .unwrap()
        };

        assert!(parse("").validate().is_ok());
        assert!(parse("[dispatch]\ninterval_ms = 0").validate().is_err());
        assert!(parse("[queue]\nbatch_size = 0").validate().is_err());
        assert!(
            parse("[backup]\ndir = \"/tmp\"\ninterval_secs = 0")
                .validate()
                .is_err()
        );
    }
}
