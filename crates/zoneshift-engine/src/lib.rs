//! zoneshift-engine — the single-owner control loop.
//!
//! # Architecture
//!
//! ```text
//! ClusterHandle ──mpsc+oneshot──▶ driver task ──watch──▶ Arc<SimulationView>
//!                                     │
//!                                     ▼
//!                                Simulation
//!                                  ├── Timeline  (logical now, timer heap, generation)
//!                                  ├── ClusterTopologyController
//!                                  ├── DemandPhaseScheduler + AutoscaleTrigger
//!                                  ├── MetricsSynthesizer + MetricHistory
//!                                  └── EventLog
//! ```

pub mod actor;
pub mod simulation;
pub mod timeline;

pub use actor::{logical_step, spawn, ClusterHandle, Command, EngineError, EngineResult};
pub use simulation::{Simulation, SimulationView};
pub use timeline::{Timeline, TimerKind};
