//! Measurement spot model and validation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for a [`MeasurementSpot`].
#[derive(Debug, Error)]
pub enum SpotError {
    #[error("Spot ID must be positive")]
    InvalidId,

    #[error("Spot name cannot be empty")]
    EmptyName,

    #[error("Spot name contains invalid characters")]
    InvalidName,

    #[error("Coordinates must be non-negative")]
    NegativeCoordinates,

    #[error("Minimum temperature must be less than maximum temperature")]
    InvertedTemperatureBand,

    #[error("Temperature range must be between -100°C and 500°C")]
    TemperatureOutOfRange,

    #[error("Noise factor must be between 0.0 and 1.0")]
    InvalidNoiseFactor,

    #[error("Spot is not ready for measurement")]
    NotReady,
}

/// Runtime state of a measurement spot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotState {
    #[default]
    Inactive,
    Active,
    Reading,
    Error,
}

/// A virtual thermal measurement point at fixed image coordinates.
///
/// Spots are exclusively owned by the registry; everything handed out to
/// callers is a copy, so list/response building can never mutate registry
/// state. The `created_at` / `last_reading` fields are RPC metadata carried
/// through persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementSpot {
    pub id: i32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub min_temp: f64,
    pub max_temp: f64,
    pub noise_factor: f64,
    pub enabled: bool,

    #[serde(skip)]
    pub state: SpotState,

    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(rename = "lastReading", default, skip_serializing_if = "Option::is_none")]
    pub last_reading: Option<String>,
}

impl Default for MeasurementSpot {
    fn default() -> Self {
        MeasurementSpot {
            id: 0,
            name: String::new(),
            x: 0,
            y: 0,
            min_temp: 20.0,
            max_temp: 25.0,
            noise_factor: 0.1,
            enabled: false,
            state: SpotState::Inactive,
            created_at: None,
            last_reading: None,
        }
    }
}

impl MeasurementSpot {
    /// Checks the structural invariants of the spot definition.
    pub fn validate(&self) -> Result<(), SpotError> {
        if self.id <= 0 {
            return Err(SpotError::InvalidId);
        }
        if self.name.is_empty() {
            return Err(SpotError::EmptyName);
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-')
        {
            return Err(SpotError::InvalidName);
        }
        if self.x < 0 || self.y < 0 {
            return Err(SpotError::NegativeCoordinates);
        }
        if self.min_temp >= self.max_temp {
            return Err(SpotError::InvertedTemperatureBand);
        }
        if self.min_temp < -100.0 || self.max_temp > 500.0 {
            return Err(SpotError::TemperatureOutOfRange);
        }
        if !(0.0..=1.0).contains(&self.noise_factor) {
            return Err(SpotError::InvalidNoiseFactor);
        }
        Ok(())
    }

    /// A spot is ready when it is enabled and in the `Active` state.
    pub fn is_ready(&self) -> bool {
        self.enabled && self.state == SpotState::Active
    }

    /// Generates a simulated reading from the spot's own temperature band.
    ///
    /// The reading is the band midpoint plus uniform jitter scaled by the
    /// noise factor, clamped to `[min_temp, max_temp]`.
    pub fn generate_temperature(&self) -> Result<f64, SpotError> {
        if !self.is_ready() {
            return Err(SpotError::NotReady);
        }

        let base = (self.min_temp + self.max_temp) / 2.0;
        let spread = (self.max_temp - self.min_temp) * self.noise_factor;

        let variation = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread / 2.0..=spread / 2.0)
        } else {
            0.0
        };

        Ok((base + variation).clamp(self.min_temp, self.max_temp))
    }

    /// Whether a temperature lies inside this spot's configured band.
    pub fn is_temperature_expected(&self, temperature: f64) -> bool {
        temperature >= self.min_temp && temperature <= self.max_temp
    }

    pub fn set_state(&mut self, state: SpotState) {
        self.state = state;
    }
}
