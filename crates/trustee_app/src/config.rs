use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use log::LevelFilter;
use serde::Deserialize;
use trustee_engine::{NetworkSettings, TrusteeConfig};
use trustee_logging::trustee_info;

use crate::logging::LogDestination;

pub(crate) const CONFIG_FILENAME: &str = "trustee.ron";

/// Host settings, read from a RON file. Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub data_dir: PathBuf,
    pub log_destination: LogDestination,
    pub log_level: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub show_notifications: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let network = NetworkSettings::default();
        Self {
            data_dir: PathBuf::from("./trustee_data"),
            log_destination: LogDestination::Both,
            log_level: "info".into(),
            connect_timeout_secs: network.connect_timeout.as_secs(),
            read_timeout_secs: network.read_timeout.as_secs(),
            show_notifications: true,
        }
    }
}

impl AppConfig {
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("cannot read config {}", path.display()))
            }
        };
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = ron::from_str(content)?;
        config.level()?;
        Ok(config)
    }

    pub fn level(&self) -> anyhow::Result<LevelFilter> {
        self.log_level
            .parse()
            .with_context(|| format!("unknown log level {:?}", self.log_level))
    }

    pub fn trustee_config(&self) -> TrusteeConfig {
        trustee_info!(
            "Timeouts: connect {}s, read {}s",
            self.connect_timeout_secs,
            self.read_timeout_secs
        );
        TrusteeConfig {
            network: NetworkSettings {
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                read_timeout: Duration::from_secs(self.read_timeout_secs),
            },
            show_notifications: self.show_notifications,
        }
    }
}
