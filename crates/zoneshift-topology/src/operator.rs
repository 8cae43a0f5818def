//! Zone operator — the operations standing behind each workflow dwell.
//!
//! The controller models the latency of each operation with a dwell and
//! asks the operator for the outcome once the dwell elapses. The
//! simulated operator always succeeds; the scripted operator replays
//! queued failures for failure drills and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;

use zoneshift_core::{ScalingError, ZoneId};

/// Performs (or stands in for) the real work of a scale workflow.
pub trait ZoneOperator: Send {
    /// Bring up new zones at the given size.
    fn create_zones(&mut self, zones: &[ZoneId], servers_per_zone: u32) -> Result<(), ScalingError>;

    /// Confirm the new zones have caught up with the primary pair.
    fn await_replication(&mut self, zones: &[ZoneId]) -> Result<(), ScalingError>;

    /// Move write leadership from one pair to the other.
    fn transfer_primary(&mut self, from: &[ZoneId], to: &[ZoneId]) -> Result<(), ScalingError>;

    /// Tear down drained zones.
    fn retire_zones(&mut self, zones: &[ZoneId]) -> Result<(), ScalingError>;
}

/// Operator whose every operation succeeds after its modeled dwell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedOperator;

impl ZoneOperator for SimulatedOperator {
    fn create_zones(&mut self, zones: &[ZoneId], servers_per_zone: u32) -> Result<(), ScalingError> {
        debug!(?zones, servers_per_zone, "simulated zone creation");
        Ok(())
    }

    fn await_replication(&mut self, zones: &[ZoneId]) -> Result<(), ScalingError> {
        debug!(?zones, "simulated replication converged");
        Ok(())
    }

    fn transfer_primary(&mut self, from: &[ZoneId], to: &[ZoneId]) -> Result<(), ScalingError> {
        debug!(?from, ?to, "simulated primary transfer");
        Ok(())
    }

    fn retire_zones(&mut self, zones: &[ZoneId]) -> Result<(), ScalingError> {
        debug!(?zones, "simulated zone retirement");
        Ok(())
    }
}

/// Which operator call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorStep {
    Create,
    Replicate,
    TransferPrimary,
    Retire,
}

#[derive(Default)]
struct Script {
    failures: HashMap<OperatorStep, VecDeque<ScalingError>>,
    calls: Vec<OperatorStep>,
}

/// Operator that fails according to a script and records every call.
///
/// Clones share the same script, so a caller can keep a handle after
/// boxing one into the controller.
#[derive(Clone, Default)]
pub struct ScriptedOperator {
    script: Arc<Mutex<Script>>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `step` with `error`.
    pub fn fail_times(&self, step: OperatorStep, error: ScalingError, times: usize) -> &Self {
        let mut script = self.lock();
        let queue = script.failures.entry(step).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
        drop(script);
        self
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<OperatorStep> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run(&self, step: OperatorStep) -> Result<(), ScalingError> {
        let mut script = self.lock();
        script.calls.push(step);
        match script.failures.get_mut(&step).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ZoneOperator for ScriptedOperator {
    fn create_zones(&mut self, _zones: &[ZoneId], _servers_per_zone: u32) -> Result<(), ScalingError> {
        self.run(OperatorStep::Create)
    }

    fn await_replication(&mut self, _zones: &[ZoneId]) -> Result<(), ScalingError> {
        self.run(OperatorStep::Replicate)
    }

    fn transfer_primary(&mut self, _from: &[ZoneId], _to: &[ZoneId]) -> Result<(), ScalingError> {
        self.run(OperatorStep::TransferPrimary)
    }

    fn retire_zones(&mut self, _zones: &[ZoneId]) -> Result<(), ScalingError> {
        self.run(OperatorStep::Retire)
    }
}
