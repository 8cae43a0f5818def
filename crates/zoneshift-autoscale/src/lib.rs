//! zoneshift-autoscale — when to scale.
//!
//! The demand scheduler cycles the synthetic traffic pattern; the trigger
//! watches demand transitions and traffic stability and decides when the
//! topology controller should scale out or in.

pub mod demand;
pub mod trigger;

pub use demand::{DemandChange, DemandPhaseScheduler};
pub use trigger::{AutoscaleTrigger, TriggerAction, TriggerView};
