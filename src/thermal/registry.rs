//! Spot registry - the bounded, persisted collection of measurement spots.
//!
//! The registry owns the spot map and is the single piece of state shared
//! between the RPC dispatch path and the periodic telemetry loop. Both go
//! through the same mutex; readers take snapshot copies so nothing outside
//! this module can mutate a spot. Every successful mutation persists the full
//! set through the [`SpotStore`], and the set is reloaded at construction.

use super::source::TemperatureSource;
use super::spot::{MeasurementSpot, SpotState};
use super::store::SpotStore;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Capacity bound for the registry. Counts every stored spot, enabled or not.
pub const MAX_SPOTS: usize = 5;

/// Outcomes of a rejected registry operation.
///
/// Each variant corresponds to exactly one RPC error code, so the protocol
/// layer can map failures without probing registry state afterwards.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid spotId: '{0}'")]
    InvalidSpotId(String),

    #[error("Spot with ID '{0}' already exists")]
    AlreadyExists(String),

    #[error("Spot with ID '{0}' not found")]
    NotFound(String),

    #[error("Invalid coordinates: ({0}, {1})")]
    InvalidCoordinates(i32, i32),

    #[error("Maximum number of spots ({MAX_SPOTS}) already created")]
    CapacityReached,

    #[error("Spot validation failed: {0}")]
    Validation(#[from] super::spot::SpotError),
}

pub struct SpotRegistry {
    spots: Mutex<BTreeMap<String, MeasurementSpot>>,
    source: Box<dyn TemperatureSource>,
    store: SpotStore,
    relaxed_ids: bool,
}

impl SpotRegistry {
    /// Builds the registry and reloads the persisted spot set.
    pub async fn load(
        source: Box<dyn TemperatureSource>,
        store: SpotStore,
        relaxed_ids: bool,
    ) -> Self {
        if !source.is_ready() {
            warn!("Temperature source {} is not ready", source.source_name());
        }

        let registry = SpotRegistry {
            spots: Mutex::new(BTreeMap::new()),
            source,
            store,
            relaxed_ids,
        };

        let loaded = registry.store.load_spots().await;
        {
            let mut spots = registry.spots.lock().await;
            for spot in loaded {
                let id = spot.id.to_string();
                if registry.accepts_id(&id) {
                    spots.insert(id, spot);
                } else {
                    warn!("Dropping persisted spot with out-of-policy ID {}", spot.id);
                }
            }
            info!("Spot registry initialized with {} existing spots", spots.len());
        }

        registry
    }

    /// Creates a spot at the given coordinates and persists the new set.
    ///
    /// The temperature band is derived from the source's base temperature at
    /// the coordinates (±0.5 °C); when the source is unready a 20-25 °C
    /// default band is used instead.
    pub async fn create_spot(
        &self,
        spot_id: &str,
        x: i32,
        y: i32,
    ) -> Result<MeasurementSpot, RegistryError> {
        if !self.accepts_id(spot_id) {
            return Err(RegistryError::InvalidSpotId(spot_id.to_string()));
        }

        // accepts_id guarantees the parse succeeds. Keying by the canonical
        // decimal form keeps later lookups consistent with the reported id.
        let id: i32 = spot_id.parse().unwrap_or_default();
        let key = id.to_string();

        let mut spots = self.spots.lock().await;

        if Self::is_present(&spots, &key) {
            return Err(RegistryError::AlreadyExists(key));
        }
        if spots.len() >= MAX_SPOTS {
            return Err(RegistryError::CapacityReached);
        }
        if !self.source.validate_coordinates(x, y) {
            return Err(RegistryError::InvalidCoordinates(x, y));
        }

        let mut spot = MeasurementSpot {
            id,
            name: format!("thermal_spot_{key}"),
            enabled: true,
            state: SpotState::Active,
            created_at: Some(now_timestamp()),
            ..MeasurementSpot::default()
        };
        self.configure_band(&mut spot, x, y);
        spot.validate()?;

        spots.insert(key.clone(), spot.clone());
        self.persist(&spots).await;

        info!("Created spot {} at coordinates ({}, {})", key, x, y);
        Ok(spot)
    }

    /// Relocates an existing spot and recomputes its temperature band.
    pub async fn move_spot(&self, spot_id: &str, x: i32, y: i32) -> Result<(), RegistryError> {
        let mut spots = self.spots.lock().await;

        if !Self::is_present(&spots, spot_id) {
            return Err(RegistryError::NotFound(spot_id.to_string()));
        }
        if !self.source.validate_coordinates(x, y) {
            return Err(RegistryError::InvalidCoordinates(x, y));
        }

        // Presence was checked above, the entry is there.
        if let Some(spot) = spots.get_mut(spot_id) {
            let mut updated = spot.clone();
            self.configure_band(&mut updated, x, y);
            *spot = updated;
        }
        self.persist(&spots).await;

        info!("Moved spot {} to coordinates ({}, {})", spot_id, x, y);
        Ok(())
    }

    /// Removes a spot and persists the shrunken set.
    pub async fn delete_spot(&self, spot_id: &str) -> Result<(), RegistryError> {
        let mut spots = self.spots.lock().await;

        if spots.remove(spot_id).is_none() {
            return Err(RegistryError::NotFound(spot_id.to_string()));
        }
        self.persist(&spots).await;

        info!("Deleted spot {}", spot_id);
        Ok(())
    }

    /// Snapshot copies of all stored spots.
    pub async fn list_spots(&self) -> Vec<MeasurementSpot> {
        self.spots.lock().await.values().cloned().collect()
    }

    /// Current reading for a spot, or NaN when the spot is absent, not ready,
    /// or the source cannot provide data.
    pub async fn spot_temperature(&self, spot_id: &str) -> f64 {
        let spots = self.spots.lock().await;

        match spots.get(spot_id) {
            Some(spot) if spot.is_ready() && self.source.is_ready() => {
                self.source.temperature(spot.x, spot.y)
            }
            _ => f64::NAN,
        }
    }

    /// Whether a ready spot with this id exists.
    pub async fn spot_exists(&self, spot_id: &str) -> bool {
        Self::is_present(&*self.spots.lock().await, spot_id)
    }

    pub async fn active_spot_count(&self) -> usize {
        self.spots.lock().await.len()
    }

    pub async fn is_max_spots_reached(&self) -> bool {
        self.active_spot_count().await >= MAX_SPOTS
    }

    /// Updates the last-reading metadata after a telemetry transmission.
    pub async fn record_reading(&self, spot_id: &str) {
        if let Some(spot) = self.spots.lock().await.get_mut(spot_id) {
            spot.last_reading = Some(now_timestamp());
        }
    }

    /// Persists the current spot set, e.g. at shutdown.
    pub async fn save(&self) {
        let spots = self.spots.lock().await;
        self.persist(&spots).await;
    }

    fn accepts_id(&self, spot_id: &str) -> bool {
        if self.relaxed_ids {
            spot_id.parse::<i32>().map(|id| id > 0).unwrap_or(false)
        } else {
            matches!(spot_id, "1" | "2" | "3" | "4" | "5")
        }
    }

    fn is_present(spots: &BTreeMap<String, MeasurementSpot>, spot_id: &str) -> bool {
        spots.get(spot_id).map(|s| s.is_ready()).unwrap_or(false)
    }

    fn configure_band(&self, spot: &mut MeasurementSpot, x: i32, y: i32) {
        spot.x = x;
        spot.y = y;
        spot.noise_factor = 0.1;

        if self.source.is_ready() {
            let base = self.source.base_temperature(x, y);
            spot.min_temp = base - 0.5;
            spot.max_temp = base + 0.5;
        } else {
            warn!("Temperature source not ready, using default temperature range");
            spot.min_temp = 20.0;
            spot.max_temp = 25.0;
        }
    }

    async fn persist(&self, spots: &BTreeMap<String, MeasurementSpot>) {
        let snapshot: Vec<MeasurementSpot> = spots.values().cloned().collect();
        if let Err(e) = self.store.save_spots(&snapshot).await {
            warn!("Failed to save spots to persistence file: {}", e);
        }
    }
}

fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thermal::source::CoordinateSource;
    use tempfile::TempDir;

    async fn registry(relaxed: bool) -> (SpotRegistry, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SpotStore::new(dir.path().join("spots.json"));
        let registry =
            SpotRegistry::load(Box::new(CoordinateSource::new()), store, relaxed).await;
        (registry, dir)
    }

    #[tokio::test]
    async fn create_then_read_temperature_in_band() {
        let (registry, _dir) = registry(false).await;

        let spot = registry.create_spot("1", 160, 120).await.unwrap();
        let temp = registry.spot_temperature("1").await;

        assert!(!temp.is_nan());
        assert!(spot.is_temperature_expected(temp));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let (registry, _dir) = registry(false).await;

        registry.create_spot("1", 10, 10).await.unwrap();
        let err = registry.create_spot("1", 50, 50).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));

        // Coordinates of the original spot are untouched.
        let spots = registry.list_spots().await;
        assert_eq!(spots[0].x, 10);
        assert_eq!(spots[0].y, 10);
    }

    #[tokio::test]
    async fn capacity_is_bounded_at_five() {
        let (registry, _dir) = registry(false).await;

        for id in 1..=5 {
            registry
                .create_spot(&id.to_string(), id * 10, id * 10)
                .await
                .unwrap();
        }
        assert!(registry.is_max_spots_reached().await);

        // The restricted policy rejects "6" before the capacity check.
        let err = registry.create_spot("6", 10, 10).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSpotId(_)));
        assert_eq!(registry.active_spot_count().await, 5);
    }

    #[tokio::test]
    async fn relaxed_policy_hits_capacity_instead() {
        let (registry, _dir) = registry(true).await;

        for id in 1..=5 {
            registry
                .create_spot(&id.to_string(), id * 10, id * 10)
                .await
                .unwrap();
        }

        let err = registry.create_spot("6", 10, 10).await.unwrap_err();
        assert!(matches!(err, RegistryError::CapacityReached));
        assert_eq!(registry.active_spot_count().await, 5);
    }

    #[tokio::test]
    async fn relaxed_ids_are_stored_in_canonical_form() {
        let (registry, _dir) = registry(true).await;

        let spot = registry.create_spot("007", 10, 10).await.unwrap();
        assert_eq!(spot.id, 7);
        assert_eq!(spot.name, "thermal_spot_7");

        // Lookups by the reported id hit the entry.
        assert!(registry.spot_exists("7").await);
        assert!(!registry.spot_temperature("7").await.is_nan());

        let err = registry.create_spot("7", 50, 50).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn coordinate_bounds_are_enforced() {
        let (registry, _dir) = registry(false).await;

        assert!(registry.create_spot("1", 0, 0).await.is_ok());
        assert!(registry.create_spot("2", 319, 239).await.is_ok());

        let err = registry.create_spot("3", 320, 0).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCoordinates(_, _)));
        let err = registry.create_spot("3", 0, 240).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCoordinates(_, _)));
        let err = registry.create_spot("3", -1, 0).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCoordinates(_, _)));
    }

    #[tokio::test]
    async fn move_recomputes_temperature_band() {
        let (registry, _dir) = registry(false).await;

        let created = registry.create_spot("1", 160, 120).await.unwrap();
        registry.move_spot("1", 0, 0).await.unwrap();

        let moved = registry.list_spots().await.remove(0);
        assert_eq!(moved.x, 0);
        assert_eq!(moved.y, 0);
        assert!(moved.min_temp > created.min_temp);
    }

    #[tokio::test]
    async fn move_unknown_spot_fails() {
        let (registry, _dir) = registry(false).await;
        let err = registry.move_spot("4", 10, 10).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_recreate_succeeds() {
        let (registry, _dir) = registry(false).await;

        registry.create_spot("1", 10, 10).await.unwrap();
        registry.delete_spot("1").await.unwrap();
        assert!(matches!(
            registry.delete_spot("1").await.unwrap_err(),
            RegistryError::NotFound(_)
        ));

        registry.create_spot("1", 20, 20).await.unwrap();
        assert_eq!(registry.active_spot_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_spot_temperature_is_nan() {
        let (registry, _dir) = registry(false).await;
        assert!(registry.spot_temperature("3").await.is_nan());
    }

    #[tokio::test]
    async fn persisted_spots_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spots.json");

        {
            let store = SpotStore::new(&path);
            let registry =
                SpotRegistry::load(Box::new(CoordinateSource::new()), store, false).await;
            registry.create_spot("1", 100, 100).await.unwrap();
            registry.create_spot("2", 200, 200).await.unwrap();
        }

        let store = SpotStore::new(&path);
        let registry = SpotRegistry::load(Box::new(CoordinateSource::new()), store, false).await;
        assert_eq!(registry.active_spot_count().await, 2);
        assert!(registry.spot_exists("1").await);
        assert!(registry.spot_exists("2").await);
    }
}
