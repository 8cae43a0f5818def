//! zoneshift-topology — zones, primary role, and the scale workflow.
//!
//! # Architecture
//!
//! ```text
//! ClusterTopologyController
//!   ├── scale_out() / scale_in()  → first Dwell, or ScaleRejected
//!   ├── advance(step)             → next Dwell (Provision → Replicate →
//!   │                               SwitchPrimary → Retire → Remove → Finish)
//!   ├── retry()                   ← leave Failed
//!   └── ZoneOperator              ← simulated or scripted outcomes per step
//!
//! EventLog
//!   └── bounded, most recent first, handover markers
//! ```

pub mod controller;
pub mod events;
pub mod operator;

pub use controller::{ClusterTopologyController, Dwell, Recovery, WorkflowStep};
pub use events::EventLog;
pub use operator::{OperatorStep, ScriptedOperator, SimulatedOperator, ZoneOperator};
