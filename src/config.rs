//! Application configuration loaded from a TOML file.
//!
//! Every section has sensible defaults so the device can start with a
//! missing or partial configuration file; only an unreadable or invalid file
//! is an error. Static measurement spots listed in the telemetry section are
//! created at startup if they are not already present in the persisted set.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE: &str = "thermal-mqtt.toml";
const DEFAULT_SPOTS_FILE: &str = "spots.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Broker connection and authentication parameters.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct ThingsBoardConfig {
    pub host: String,
    pub port: u16,
    /// Device access token; used as the MQTT username with an empty password.
    pub access_token: String,
    pub device_id: String,
    pub keep_alive_seconds: u64,
    pub qos: u8,
}

impl Default for ThingsBoardConfig {
    fn default() -> Self {
        ThingsBoardConfig {
            host: "localhost".to_string(),
            port: 1883,
            access_token: String::new(),
            device_id: "thermal-device".to_string(),
            keep_alive_seconds: 60,
            qos: 1,
        }
    }
}

/// Telemetry transmission parameters and startup spots.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_seconds: u64,
    /// Spots created at startup when not already persisted.
    pub spots: Vec<StaticSpot>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            interval_seconds: 15,
            spots: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct StaticSpot {
    pub id: String,
    pub x: i32,
    pub y: i32,
}

/// Reconnection behavior of the connection manager.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0 means unlimited attempts.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            enabled: true,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            max_attempts: 0,
        }
    }
}

/// Spot persistence and identifier policy.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Spot store file; defaults to `spots.json` in the platform data dir.
    pub spots_file: Option<PathBuf>,
    /// Accept arbitrary positive integer spot ids instead of only "1".."5".
    pub relaxed_spot_ids: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Configuration {
    pub thingsboard: ThingsBoardConfig,
    pub telemetry: TelemetryConfig,
    pub reconnect: ReconnectConfig,
    pub storage: StorageConfig,
}

impl Configuration {
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Loads the configuration, falling back to defaults when the file does
    /// not exist.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Configuration file {} does not exist, using defaults",
                    path.display()
                );
                return Ok(Configuration::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: Configuration = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thingsboard.host.is_empty() {
            return Err(ConfigError::Invalid("thingsboard.host is empty".into()));
        }
        if self.thingsboard.qos > 2 {
            return Err(ConfigError::Invalid(format!(
                "thingsboard.qos must be 0-2, got {}",
                self.thingsboard.qos
            )));
        }
        if self.telemetry.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "telemetry.interval_seconds must be at least 1".into(),
            ));
        }
        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms
        {
            return Err(ConfigError::Invalid(
                "reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Resolves the spot store location, preferring the configured path.
    pub fn spots_file(&self) -> PathBuf {
        if let Some(path) = &self.storage.spots_file {
            return path.clone();
        }

        dirs::data_dir()
            .map(|dir| dir.join("thermal-mqtt").join(DEFAULT_SPOTS_FILE))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SPOTS_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration::load(&dir.path().join("none.toml"))
            .await
            .unwrap();

        assert_eq!(config.thingsboard.port, 1883);
        assert_eq!(config.telemetry.interval_seconds, 15);
        assert!(config.reconnect.enabled);
        assert!(!config.storage.relaxed_spot_ids);
    }

    #[tokio::test]
    async fn partial_file_keeps_section_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            r#"
[thingsboard]
host = "broker.example.com"
access_token = "token123"

[telemetry]
interval_seconds = 5

[[telemetry.spots]]
id = "1"
x = 160
y = 120
"#,
        )
        .await
        .unwrap();

        let config = Configuration::load(&path).await.unwrap();
        assert_eq!(config.thingsboard.host, "broker.example.com");
        assert_eq!(config.thingsboard.port, 1883);
        assert_eq!(config.telemetry.interval_seconds, 5);
        assert_eq!(config.telemetry.spots.len(), 1);
        assert_eq!(config.telemetry.spots[0].id, "1");
        assert_eq!(config.reconnect.max_delay_ms, 30000);
    }

    #[tokio::test]
    async fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[telemetry]\ninterval_seconds = 0\n")
            .await
            .unwrap();

        assert!(matches!(
            Configuration::load(&path).await,
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "not toml at all [[[").await.unwrap();

        assert!(matches!(
            Configuration::load(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn configured_spots_file_wins() {
        let config = Configuration {
            storage: StorageConfig {
                spots_file: Some(PathBuf::from("/tmp/custom-spots.json")),
                relaxed_spot_ids: false,
            },
            ..Configuration::default()
        };
        assert_eq!(config.spots_file(), PathBuf::from("/tmp/custom-spots.json"));
    }
}
