//! Temperature source strategies for the simulated thermal camera.
//!
//! A [`TemperatureSource`] turns image coordinates into temperature readings.
//! The shipped [`CoordinateSource`] is a pure simulation: the base temperature
//! rises linearly with the distance from the image center, and each reading
//! carries a small random variation on top. Remote data feeds are expected to
//! implement the same trait without the variation guarantee.

use rand::Rng;

/// Thermal image width in pixels. Valid x coordinates are `0..IMAGE_WIDTH`.
pub const IMAGE_WIDTH: i32 = 320;
/// Thermal image height in pixels. Valid y coordinates are `0..IMAGE_HEIGHT`.
pub const IMAGE_HEIGHT: i32 = 240;

/// Strategy interface for temperature generation.
///
/// `base_temperature` must be deterministic for a given coordinate pair;
/// `temperature` may add per-reading variation. Implementations report their
/// own readiness so callers can degrade gracefully while a remote feed is
/// still warming up.
pub trait TemperatureSource: Send + Sync + 'static {
    /// Temperature reading for the given coordinates, variation included.
    fn temperature(&self, x: i32, y: i32) -> f64;

    /// Deterministic base temperature for the given coordinates.
    fn base_temperature(&self, x: i32, y: i32) -> f64;

    /// Whether the source can currently provide readings.
    fn is_ready(&self) -> bool;

    /// Whether the coordinates lie inside this source's image bounds.
    fn validate_coordinates(&self, x: i32, y: i32) -> bool;

    /// Human-readable source identifier for logs.
    fn source_name(&self) -> &'static str;
}

/// Coordinate-based simulation source.
///
/// Base temperature interpolates from [`Self::MIN_BASE_TEMP`] at the image
/// center to [`Self::MAX_BASE_TEMP`] at the corners by normalized Euclidean
/// distance. Each reading adds a uniform variation in
/// ±[`Self::VARIATION_RANGE`] °C.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoordinateSource;

impl CoordinateSource {
    const CENTER_X: f64 = IMAGE_WIDTH as f64 / 2.0;
    const CENTER_Y: f64 = IMAGE_HEIGHT as f64 / 2.0;

    /// Base temperature at the image center.
    pub const MIN_BASE_TEMP: f64 = 20.0;
    /// Base temperature at the image corners.
    pub const MAX_BASE_TEMP: f64 = 50.0;
    /// Per-reading random variation bound in °C.
    pub const VARIATION_RANGE: f64 = 0.5;

    pub fn new() -> Self {
        CoordinateSource
    }

    /// Normalized distance from the image center, 0.0 at the center and 1.0
    /// at the corners.
    fn distance_from_center(x: i32, y: i32) -> f64 {
        let dx = f64::from(x) - Self::CENTER_X;
        let dy = f64::from(y) - Self::CENTER_Y;
        let max_distance =
            (Self::CENTER_X * Self::CENTER_X + Self::CENTER_Y * Self::CENTER_Y).sqrt();

        ((dx * dx + dy * dy).sqrt() / max_distance).clamp(0.0, 1.0)
    }
}

impl TemperatureSource for CoordinateSource {
    fn temperature(&self, x: i32, y: i32) -> f64 {
        if !self.validate_coordinates(x, y) {
            // Invalid coordinates fall back to a neutral room temperature.
            return 20.0;
        }

        let variation = rand::thread_rng()
            .gen_range(-Self::VARIATION_RANGE..=Self::VARIATION_RANGE);
        self.base_temperature(x, y) + variation
    }

    fn base_temperature(&self, x: i32, y: i32) -> f64 {
        if !self.validate_coordinates(x, y) {
            return Self::MIN_BASE_TEMP;
        }

        let distance = Self::distance_from_center(x, y);
        Self::MIN_BASE_TEMP + (Self::MAX_BASE_TEMP - Self::MIN_BASE_TEMP) * distance
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn validate_coordinates(&self, x: i32, y: i32) -> bool {
        (0..IMAGE_WIDTH).contains(&x) && (0..IMAGE_HEIGHT).contains(&y)
    }

    fn source_name(&self) -> &'static str {
        "CoordinateSource"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_coordinates_are_valid() {
        let source = CoordinateSource::new();
        assert!(source.validate_coordinates(0, 0));
        assert!(source.validate_coordinates(319, 239));
        assert!(!source.validate_coordinates(-1, 0));
        assert!(!source.validate_coordinates(320, 0));
        assert!(!source.validate_coordinates(0, 240));
    }

    #[test]
    fn base_temperature_is_minimal_at_center() {
        let source = CoordinateSource::new();
        assert!((source.base_temperature(160, 120) - CoordinateSource::MIN_BASE_TEMP).abs() < 1e-9);
    }

    #[test]
    fn base_temperature_reaches_maximum_at_corner() {
        let source = CoordinateSource::new();
        // The center sits at (160, 120), so (0, 0) is exactly one
        // normalization distance away.
        let corner = source.base_temperature(0, 0);
        assert!((corner - CoordinateSource::MAX_BASE_TEMP).abs() < 1e-9);

        // The opposite pixel corner is slightly closer to the center.
        let far = source.base_temperature(319, 239);
        assert!(far > 49.0 && far < CoordinateSource::MAX_BASE_TEMP);
    }

    #[test]
    fn reading_stays_within_variation_band() {
        let source = CoordinateSource::new();
        let base = source.base_temperature(42, 77);
        for _ in 0..100 {
            let reading = source.temperature(42, 77);
            assert!((reading - base).abs() <= CoordinateSource::VARIATION_RANGE + 1e-9);
        }
    }

    #[test]
    fn invalid_coordinates_fall_back_to_room_temperature() {
        let source = CoordinateSource::new();
        assert!((source.temperature(-5, 10) - 20.0).abs() < 1e-9);
        assert!((source.base_temperature(400, 10) - CoordinateSource::MIN_BASE_TEMP).abs() < 1e-9);
    }
}
