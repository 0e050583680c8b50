//! # Thermal Simulation Module
//!
//! Models the multi-zone thermal camera this device simulates: measurement
//! spots, the strategies that turn image coordinates into temperatures, and
//! the bounded registry that owns the spot set.
//!
//! ## Module Architecture
//!
//! ```text
//! thermal/
//! ├── source.rs   - TemperatureSource trait and coordinate-based simulation
//! ├── spot.rs     - MeasurementSpot model, validation and jitter generation
//! ├── store.rs    - versioned JSON persistence with pre-write backups
//! └── registry.rs - bounded, locked, persisted spot collection
//! ```
//!
//! ## Design Philosophy
//!
//! - **Leaf-first layering**: the source is a pure strategy, the store only
//!   touches the filesystem, and the registry wires the two together.
//! - **Copies out, mutations in**: callers only ever receive spot copies;
//!   every mutation goes through a registry method that also persists.
//! - **Fail-safe persistence**: a corrupted store file degrades to an empty
//!   spot set and never blocks device startup.

pub mod registry;
pub mod source;
pub mod spot;
pub mod store;

pub use registry::{RegistryError, SpotRegistry, MAX_SPOTS};
pub use source::{CoordinateSource, TemperatureSource, IMAGE_HEIGHT, IMAGE_WIDTH};
pub use spot::{MeasurementSpot, SpotError, SpotState};
pub use store::SpotStore;
