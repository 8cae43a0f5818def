//! Demand phase scheduler — the cyclic synthetic traffic pattern.
//!
//! Steady → RampUp → Peak → RampDown → Steady, each phase held for a fixed
//! logical duration. Every transition bumps an epoch; phase-change timers
//! carry the epoch they were scheduled under and are ignored once it moved.

use std::time::Duration;

use tracing::{debug, info};

use zoneshift_core::{DemandConfig, DemandPhase};
use zoneshift_topology::EventLog;

/// A demand phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandChange {
    pub from: DemandPhase,
    pub to: DemandPhase,
    /// Epoch after the transition.
    pub epoch: u64,
}

pub struct DemandPhaseScheduler {
    cfg: DemandConfig,
    phase: DemandPhase,
    previous: Option<DemandPhase>,
    entered_at: Duration,
    epoch: u64,
    /// Completed Steady → … → Steady cycles.
    cycle: u64,
}

impl DemandPhaseScheduler {
    pub fn new(cfg: DemandConfig) -> Self {
        Self {
            cfg,
            phase: DemandPhase::Steady,
            previous: None,
            entered_at: Duration::ZERO,
            epoch: 0,
            cycle: 0,
        }
    }

    /// Back to Steady at time zero. The epoch keeps counting so timers
    /// scheduled before the reset stay stale.
    pub fn reset(&mut self) {
        self.phase = DemandPhase::Steady;
        self.previous = None;
        self.entered_at = Duration::ZERO;
        self.epoch += 1;
        self.cycle = 0;
    }

    pub fn phase(&self) -> DemandPhase {
        self.phase
    }

    pub fn previous(&self) -> Option<DemandPhase> {
        self.previous
    }

    pub fn entered_at(&self) -> Duration {
        self.entered_at
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.entered_at)
    }

    /// How long `phase` is held; `None` holds it until forced.
    pub fn duration_of(&self, phase: DemandPhase) -> Option<Duration> {
        match phase {
            DemandPhase::Steady => self.cfg.steady,
            DemandPhase::RampUp => Some(self.cfg.ramp_up),
            DemandPhase::Peak => Some(self.cfg.peak),
            DemandPhase::RampDown => Some(self.cfg.ramp_down),
        }
    }

    /// When the current phase ends on its own.
    pub fn next_change_at(&self) -> Option<Duration> {
        self.duration_of(self.phase).map(|d| self.entered_at + d)
    }

    /// Move to the next phase if the timer's `epoch` is still current.
    pub fn advance(&mut self, now: Duration, epoch: u64, log: &mut EventLog) -> Option<DemandChange> {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "discarding stale demand timer");
            return None;
        }
        Some(self.transition(self.phase.next(), now, log))
    }

    /// Edge transition to `phase` right now.
    pub fn force(&mut self, phase: DemandPhase, now: Duration, log: &mut EventLog) -> DemandChange {
        info!(from = %self.phase, to = %phase, "forcing demand phase");
        self.transition(phase, now, log)
    }

    fn transition(&mut self, to: DemandPhase, now: Duration, log: &mut EventLog) -> DemandChange {
        let from = self.phase;
        self.previous = Some(from);
        self.phase = to;
        self.entered_at = now;
        self.epoch += 1;
        if to == DemandPhase::Steady {
            self.cycle += 1;
        }

        info!(%from, %to, epoch = self.epoch, cycle = self.cycle, "demand phase changed");
        log.info(now, format!("Demand phase: {} → {}", label(from), label(to)));
        DemandChange {
            from,
            to,
            epoch: self.epoch,
        }
    }
}

fn label(phase: DemandPhase) -> &'static str {
    match phase {
        DemandPhase::Steady => "Steady",
        DemandPhase::RampUp => "Ramp Up",
        DemandPhase::Peak => "Peak",
        DemandPhase::RampDown => "Ramp Down",
    }
}
