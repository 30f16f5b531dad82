use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::capabilities::{ModuleDefaults, Toggle};
use crate::producer::DefinitionFallback;

pub const CONFIG_ENV: &str = "POLLMESH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pollmesh.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Shared configuration file for controller, workers and sinks. Every
/// section has defaults, so a partial file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollmeshConfig {
    pub mqtt: MqttConf,
    /// Global module enablement defaults.
    pub poller_modules: ModuleDefaults,
    pub walk: WalkConf,
    pub workers: WorkerConf,
    pub capabilities: CapabilityConf,
    pub inventory: InventoryConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub max_reconnect_attempts: u32,
    /// Shared-subscription group for the job queue; `None` subscribes directly.
    pub share_group: Option<String>,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConf {
    /// Session open and per-request timeout.
    pub timeout_secs: u64,
    /// Upper bound for a whole walk, all round trips included.
    pub max_duration_secs: u64,
    /// Bulk-walk executable used by the worker.
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConf {
    pub concurrency: usize,
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConf {
    pub definitions_dir: PathBuf,
    pub on_missing: DefinitionFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConf {
    pub path: PathBuf,
}

impl Default for PollmeshConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            poller_modules: ModuleDefaults::from([("ports".to_string(), Toggle::Enabled)]),
            walk: WalkConf::default(),
            workers: WorkerConf::default(),
            capabilities: CapabilityConf::default(),
            inventory: InventoryConf::default(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: None,
            keep_alive_secs: 15,
            max_reconnect_attempts: 10,
            share_group: Some("pollmesh-workers".into()),
            channel_capacity: 64,
        }
    }
}

impl Default for WalkConf {
    fn default() -> Self {
        Self {
            timeout_secs: 2,
            max_duration_secs: 60,
            command: "snmpbulkwalk".into(),
        }
    }
}

impl Default for WorkerConf {
    fn default() -> Self {
        Self { concurrency: 8, stats_interval_secs: 60 }
    }
}

impl Default for CapabilityConf {
    fn default() -> Self {
        Self {
            definitions_dir: PathBuf::from("definitions"),
            on_missing: DefinitionFallback::Abort,
        }
    }
}

impl Default for InventoryConf {
    fn default() -> Self {
        Self { path: PathBuf::from("inventory.json") }
    }
}

impl WalkConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs.max(self.timeout_secs))
    }
}

impl PollmeshConfig {
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.walk.timeout_secs == 0 {
            return Err(ConfigError::Invalid("walk.timeout_secs must be positive".into()));
        }
        if self.workers.concurrency == 0 {
            return Err(ConfigError::Invalid("workers.concurrency must be positive".into()));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Invalid("mqtt.channel_capacity must be positive".into()));
        }
        // Each in-flight job may hold one telemetry publish in the client's
        // request channel.
        if self.workers.concurrency > self.mqtt.channel_capacity {
            return Err(ConfigError::Invalid(format!(
                "workers.concurrency ({}) exceeds mqtt.channel_capacity ({})",
                self.workers.concurrency, self.mqtt.channel_capacity
            )));
        }
        if self.mqtt.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid("mqtt.max_reconnect_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// Loads `$POLLMESH_CONFIG` (default `pollmesh.yaml`). A missing or empty
/// file gives the defaults; an unreadable or invalid one is an error.
pub async fn load_config() -> Result<PollmeshConfig, ConfigError> {
    let path = PathBuf::from(std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into()));
    load_config_from(&path).await
}

pub async fn load_config_from(path: &Path) -> Result<PollmeshConfig, ConfigError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "no config file, using defaults");
            return Ok(PollmeshConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
    };
    if text.trim().is_empty() {
        return Ok(PollmeshConfig::default());
    }
    PollmeshConfig::from_yaml(path, &text)
}
