//! JSON-backed persistence for measurement spot definitions.
//!
//! The store file is a versioned document; a timestamped backup of the prior
//! file is written before every overwrite. Loading degrades gracefully: a
//! missing file, an unsupported schema version or a corrupted document all
//! yield an empty spot set instead of failing startup, and individual records
//! that fail validation are skipped rather than fatal.

use super::spot::{MeasurementSpot, SpotState};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Only documents with this version are accepted.
pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize)]
struct SpotFile {
    version: String,
    #[serde(rename = "lastUpdated")]
    last_updated: String,
    #[serde(rename = "totalActiveSpots")]
    total_active_spots: usize,
    thermal_spots: Vec<Value>,
}

/// Durable storage for the registry's spot set.
pub struct SpotStore {
    path: PathBuf,
}

impl SpotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SpotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all valid spots from the store file.
    ///
    /// Never fails: every corruption scenario logs and returns an empty set.
    pub async fn load_spots(&self) -> Vec<MeasurementSpot> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Spot persistence file not found: {} (starting with empty spots)",
                    self.path.display()
                );
                return Vec::new();
            }
            Err(e) => {
                warn!(
                    "Failed to read spot persistence file {}: {}",
                    self.path.display(),
                    e
                );
                return Vec::new();
            }
        };

        let file: SpotFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(
                    "Corrupt spot persistence file {}: {} (starting with empty spots)",
                    self.path.display(),
                    e
                );
                return Vec::new();
            }
        };

        if file.version != SCHEMA_VERSION {
            warn!(
                "Unsupported schema version in {}: {} (expected {}), starting with empty spots",
                self.path.display(),
                file.version,
                SCHEMA_VERSION
            );
            return Vec::new();
        }

        let mut spots = Vec::new();
        for record in file.thermal_spots {
            match Self::spot_from_record(record) {
                Ok(spot) => {
                    debug!("Loaded spot ID {} from persistence", spot.id);
                    spots.push(spot);
                }
                Err(e) => warn!("Skipping invalid spot record: {}", e),
            }
        }

        info!("Loaded {} spots from {}", spots.len(), self.path.display());
        spots
    }

    /// Writes the full spot set, creating a backup of the prior file first.
    pub async fn save_spots(&self, spots: &[MeasurementSpot]) -> Result<()> {
        self.create_backup().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| eyre!("Failed to create spot store directory: {}", e))?;
            }
        }

        let file = SpotFile {
            version: SCHEMA_VERSION.to_string(),
            last_updated: current_timestamp(),
            total_active_spots: spots.len(),
            thermal_spots: spots.iter().map(Self::spot_to_record).collect(),
        };

        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| eyre!("Failed to serialize spot store: {}", e))?;

        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| eyre!("Failed to write spot store file: {}", e))?;

        debug!("Saved {} spots to {}", spots.len(), self.path.display());
        Ok(())
    }

    /// Best-effort copy of the current file to `<path>.backup.<timestamp>`.
    async fn create_backup(&self) {
        match tokio::fs::try_exists(&self.path).await {
            Ok(true) => {}
            _ => return,
        }

        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let mut backup = self.path.as_os_str().to_owned();
        backup.push(format!(".backup.{stamp}"));

        match tokio::fs::copy(&self.path, &backup).await {
            Ok(_) => debug!("Created backup: {}", PathBuf::from(&backup).display()),
            Err(e) => warn!(
                "Failed to create backup of {}: {}",
                self.path.display(),
                e
            ),
        }
    }

    fn spot_from_record(record: Value) -> Result<MeasurementSpot> {
        let mut spot: MeasurementSpot = serde_json::from_value(record)
            .map_err(|e| eyre!("malformed spot record: {}", e))?;

        spot.validate()
            .map_err(|e| eyre!("invalid spot configuration: {}", e))?;

        spot.state = if spot.enabled {
            SpotState::Active
        } else {
            SpotState::Inactive
        };
        Ok(spot)
    }

    fn spot_to_record(spot: &MeasurementSpot) -> Value {
        let now = current_timestamp();
        let mut record = serde_json::to_value(spot).unwrap_or(Value::Null);

        if let Value::Object(map) = &mut record {
            // RPC metadata rides along with every saved record.
            map.entry("createdAt".to_string())
                .or_insert_with(|| Value::String(now.clone()));
            map.insert("lastReading".to_string(), Value::String(now));
            map.insert(
                "status".to_string(),
                Value::String(
                    if spot.state == SpotState::Active {
                        "active"
                    } else {
                        "inactive"
                    }
                    .to_string(),
                ),
            );
        }

        record
    }
}

fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
