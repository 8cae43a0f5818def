//! Autoscale trigger — decides when the cluster should change size.
//!
//! The trigger never touches the cluster itself. The driver reports demand
//! transitions and completed workflows, schedules a check at
//! [`AutoscaleTrigger::next_check`], and acts on whatever
//! [`AutoscaleTrigger::evaluate`] returns.
//!
//! Rules:
//! - Steady entered from RampDown with the cluster large: wait the settle
//!   delay, then scale in on the first stable reading.
//! - Steady entered any other way with the cluster small: scale out after
//!   the first-cycle delay (first cycle) or the next-cycle delay.
//! - A scale-in completing in Steady arms the next cycle's scale-out.
//! - A scale-out completing in Steady forces demand into RampUp.

use std::time::Duration;

use tracing::{debug, info};

use zoneshift_core::{as_millis, DemandPhase, ScalingDirection, ScalingPhase, TriggerConfig};

/// What the driver should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    ScaleOut,
    ScaleIn,
    /// Leave Steady for RampUp immediately.
    ForceRampUp,
}

/// The state the trigger reads on each check.
#[derive(Debug, Clone, Copy)]
pub struct TriggerView {
    pub now: Duration,
    pub demand_phase: DemandPhase,
    pub scaling_phase: ScalingPhase,
    pub is_small: bool,
    pub is_large: bool,
    /// Result of the stability predicate over the latest samples.
    pub stable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Armed {
    ScaleOut { at: Duration },
    ScaleIn { poll_from: Duration },
}

impl Armed {
    fn due(self) -> Duration {
        match self {
            Armed::ScaleOut { at } => at,
            Armed::ScaleIn { poll_from } => poll_from,
        }
    }
}

pub struct AutoscaleTrigger {
    cfg: TriggerConfig,
    armed: Option<Armed>,
    /// Bumped on every arm or disarm. Checks scheduled under an older
    /// value are stale.
    arm_seq: u64,
    first_cycle: bool,
}

impl AutoscaleTrigger {
    pub fn new(cfg: TriggerConfig) -> Self {
        Self {
            cfg,
            armed: None,
            arm_seq: 0,
            first_cycle: true,
        }
    }

    pub fn reset(&mut self) {
        self.set_armed(None);
        self.first_cycle = true;
    }

    pub fn arm_seq(&self) -> u64 {
        self.arm_seq
    }

    /// The pending action, if any.
    pub fn armed(&self) -> Option<TriggerAction> {
        self.armed.map(|a| match a {
            Armed::ScaleOut { .. } => TriggerAction::ScaleOut,
            Armed::ScaleIn { .. } => TriggerAction::ScaleIn,
        })
    }

    /// When the next check should run, given the current time.
    pub fn next_check(&self, now: Duration) -> Option<Duration> {
        self.armed.map(|a| {
            let due = a.due();
            if due > now { due } else { now + self.cfg.poll_interval }
        })
    }

    /// React to a demand transition. `previous` is `None` on the initial
    /// Steady at start.
    pub fn on_demand_change(
        &mut self,
        previous: Option<DemandPhase>,
        current: DemandPhase,
        now: Duration,
        is_small: bool,
        is_large: bool,
    ) {
        if current != DemandPhase::Steady {
            if self.armed.is_some() {
                debug!(%current, "leaving steady, disarming trigger");
            }
            self.set_armed(None);
            return;
        }

        let armed = if previous == Some(DemandPhase::RampDown) {
            if is_large {
                Some(Armed::ScaleIn {
                    poll_from: now + self.cfg.settle_delay,
                })
            } else if is_small {
                Some(Armed::ScaleOut {
                    at: now + self.cfg.next_cycle_delay,
                })
            } else {
                None
            }
        } else if is_small {
            let delay = if self.first_cycle {
                self.cfg.first_cycle_delay
            } else {
                self.cfg.next_cycle_delay
            };
            Some(Armed::ScaleOut { at: now + delay })
        } else {
            None
        };
        self.first_cycle = false;

        if let Some(a) = armed {
            info!(action = ?a, "trigger armed");
        }
        self.set_armed(armed);
    }

    /// Check the armed action against the current state.
    pub fn evaluate(&mut self, view: &TriggerView) -> Option<TriggerAction> {
        if view.demand_phase != DemandPhase::Steady {
            self.set_armed(None);
            return None;
        }
        let armed = self.armed?;
        if view.now < armed.due() {
            return None;
        }
        if view.scaling_phase != ScalingPhase::Idle {
            debug!(phase = %view.scaling_phase, "armed action waiting for idle");
            return None;
        }

        match armed {
            Armed::ScaleOut { .. } => {
                self.set_armed(None);
                if view.is_small {
                    info!("trigger firing scale-out");
                    Some(TriggerAction::ScaleOut)
                } else {
                    debug!("cluster already large, dropping scale-out");
                    None
                }
            }
            Armed::ScaleIn { .. } => {
                if !view.is_large {
                    debug!("cluster already small, dropping scale-in");
                    self.set_armed(None);
                    None
                } else if view.stable {
                    info!("traffic stable, trigger firing scale-in");
                    self.set_armed(None);
                    Some(TriggerAction::ScaleIn)
                } else {
                    None
                }
            }
        }
    }

    /// React to a workflow reaching Completed.
    pub fn on_scale_completed(
        &mut self,
        direction: ScalingDirection,
        demand_phase: DemandPhase,
        now: Duration,
    ) -> Option<TriggerAction> {
        if demand_phase != DemandPhase::Steady {
            return None;
        }
        match direction {
            ScalingDirection::ScaleOut => Some(TriggerAction::ForceRampUp),
            ScalingDirection::ScaleIn => {
                let at = now + self.cfg.next_cycle_delay;
                info!(at_ms = as_millis(at), "next cycle scale-out armed");
                self.set_armed(Some(Armed::ScaleOut { at }));
                None
            }
            ScalingDirection::None => None,
        }
    }

    fn set_armed(&mut self, armed: Option<Armed>) {
        self.arm_seq += 1;
        self.armed = armed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn view(now: Duration, small: bool, stable: bool) -> TriggerView {
        TriggerView {
            now,
            demand_phase: DemandPhase::Steady,
            scaling_phase: ScalingPhase::Idle,
            is_small: small,
            is_large: !small,
            stable,
        }
    }

    #[test]
    fn first_cycle_scale_out_after_short_delay() {
        let mut trigger = AutoscaleTrigger::new(TriggerConfig::default());
        trigger.on_demand_change(None, DemandPhase::Steady, secs(0), true, false);
        assert_eq!(trigger.next_check(secs(0)), Some(secs(1)));

        assert_eq!(trigger.evaluate(&view(Duration::from_millis(500), true, true)), None);
        assert_eq!(trigger.evaluate(&view(secs(1), true, true)), Some(TriggerAction::ScaleOut));
        assert_eq!(trigger.armed(), None);
    }

    #[test]
    fn later_cycles_use_next_cycle_delay() {
        let mut trigger = AutoscaleTrigger::new(TriggerConfig::default());
        trigger.on_demand_change(None, DemandPhase::Steady, secs(0), true, false);
        trigger.on_demand_change(Some(DemandPhase::Steady), DemandPhase::RampUp, secs(5), true, false);

        // Steady re-entered without a ramp down (e.g. forced).
        trigger.on_demand_change(Some(DemandPhase::Peak), DemandPhase::Steady, secs(10), true, false);
        assert_eq!(trigger.next_check(secs(10)), Some(secs(40)));
    }

    #[test]
    fn scale_in_waits_for_settle_and_stability() {
        let mut trigger = AutoscaleTrigger::new(TriggerConfig::default());
        trigger.on_demand_change(Some(DemandPhase::RampDown), DemandPhase::Steady, secs(50), false, true);
        assert_eq!(trigger.armed(), Some(TriggerAction::ScaleIn));
        assert_eq!(trigger.next_check(secs(50)), Some(secs(53)));

        assert_eq!(trigger.evaluate(&view(secs(52), false, true)), None);
        assert_eq!(trigger.evaluate(&view(secs(53), false, false)), None);
        // Still armed, polled at 1 Hz.
        assert_eq!(trigger.next_check(secs(53)), Some(secs(54)));
        assert_eq!(trigger.evaluate(&view(secs(54), false, true)), Some(TriggerAction::ScaleIn));
    }

    #[test]
    fn armed_action_waits_while_scaling() {
        let mut trigger = AutoscaleTrigger::new(TriggerConfig::default());
        trigger.on_demand_change(None, DemandPhase::Steady, secs(0), true, false);

        let mut busy = view(secs(2), true, true);
        busy.scaling_phase = ScalingPhase::RetiringZones;
        assert_eq!(trigger.evaluate(&busy), None);
        assert_eq!(trigger.armed(), Some(TriggerAction::ScaleOut));

        // The in-flight operation already made the cluster large.
        assert_eq!(trigger.evaluate(&view(secs(8), false, true)), None);
        assert_eq!(trigger.armed(), None);
    }

    #[test]
    fn leaving_steady_disarms() {
        let mut trigger = AutoscaleTrigger::new(TriggerConfig::default());
        trigger.on_demand_change(None, DemandPhase::Steady, secs(0), true, false);
        let seq = trigger.arm_seq();

        trigger.on_demand_change(Some(DemandPhase::Steady), DemandPhase::RampUp, secs(0), true, false);
        assert_eq!(trigger.armed(), None);
        assert_ne!(trigger.arm_seq(), seq);
        assert_eq!(trigger.next_check(secs(0)), None);
    }

    #[test]
    fn completions_drive_the_cycle() {
        let mut trigger = AutoscaleTrigger::new(TriggerConfig::default());
        assert_eq!(
            trigger.on_scale_completed(ScalingDirection::ScaleOut, DemandPhase::Steady, secs(9)),
            Some(TriggerAction::ForceRampUp)
        );
        assert_eq!(
            trigger.on_scale_completed(ScalingDirection::ScaleOut, DemandPhase::Peak, secs(9)),
            None
        );

        assert_eq!(
            trigger.on_scale_completed(ScalingDirection::ScaleIn, DemandPhase::Steady, secs(60)),
            None
        );
        assert_eq!(trigger.armed(), Some(TriggerAction::ScaleOut));
        assert_eq!(trigger.next_check(secs(60)), Some(secs(90)));
    }

    #[test]
    fn ramp_down_into_small_cluster_arms_next_cycle() {
        let mut trigger = AutoscaleTrigger::new(TriggerConfig::default());
        trigger.on_demand_change(None, DemandPhase::Steady, secs(0), true, false);
        trigger.on_demand_change(Some(DemandPhase::RampDown), DemandPhase::Steady, secs(40), true, false);
        assert_eq!(trigger.armed(), Some(TriggerAction::ScaleOut));
        assert_eq!(trigger.next_check(secs(40)), Some(secs(70)));
    }
}
