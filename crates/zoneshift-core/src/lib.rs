//! zoneshift-core — shared types for the zone scaling control loop.
//!
//! - **`types`** — zones, cluster shapes, scaling/demand phases, samples, events
//! - **`config`** — `SimConfig`, loaded from `zoneshift.toml`
//! - **`error`** — scaling failures, rejection reasons, config errors
//! - **`duration`** — `"800ms"` / `"3s"` style durations for config files

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{
    ClockConfig, DemandConfig, EventsConfig, MetricsConfig, SimConfig, TopologyConfig,
    TriggerConfig,
};
pub use error::{ConfigError, ScaleRejected, ScalingError};
pub use types::*;
