//! Simulation — single owner of every entity of the control loop.
//!
//! All mutations go through `&mut Simulation`, so there is exactly one
//! writer. The driver actor wraps it for async callers; tests drive it
//! directly with [`Simulation::advance`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use zoneshift_autoscale::{AutoscaleTrigger, DemandChange, DemandPhaseScheduler, TriggerAction, TriggerView};
use zoneshift_core::{
    as_millis, ClusterSnapshot, DemandPhase, LifecycleEvent, MetricSample, RunState,
    ScaleRejected, ScalingDirection, ScalingPhase, SimConfig,
};
use zoneshift_metrics::{MetricHistory, MetricsSynthesizer, TickInput};
use zoneshift_topology::{
    ClusterTopologyController, Dwell, EventLog, Recovery, SimulatedOperator, WorkflowStep,
    ZoneOperator,
};

use crate::timeline::{Timeline, TimerKind};

/// Immutable view published to readers after every change.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationView {
    pub snapshot: ClusterSnapshot,
    /// Retained samples, oldest first.
    pub samples: Vec<MetricSample>,
    /// Retained events, most recent first.
    pub events: Vec<LifecycleEvent>,
    /// Why the last operation failed, while Failed.
    pub failure: Option<String>,
    pub display_window: usize,
}

impl SimulationView {
    /// The last `n` samples, oldest first.
    pub fn recent_samples(&self, n: usize) -> &[MetricSample] {
        let skip = self.samples.len().saturating_sub(n);
        &self.samples[skip..]
    }
}

pub struct Simulation {
    cfg: SimConfig,
    timeline: Timeline,
    controller: ClusterTopologyController,
    demand: DemandPhaseScheduler,
    trigger: AutoscaleTrigger,
    synthesizer: MetricsSynthesizer,
    history: MetricHistory,
    events: EventLog,
    run_state: RunState,
    /// Whether the loop timers were seeded since the last reset.
    seeded: bool,
}

impl Simulation {
    pub fn new(cfg: SimConfig) -> Self {
        Self::with_operator(cfg, Box::new(SimulatedOperator))
    }

    pub fn with_operator(cfg: SimConfig, operator: Box<dyn ZoneOperator>) -> Self {
        let mut sim = Self {
            timeline: Timeline::new(),
            controller: ClusterTopologyController::new(cfg.topology.clone(), operator),
            demand: DemandPhaseScheduler::new(cfg.demand.clone()),
            trigger: AutoscaleTrigger::new(cfg.trigger.clone()),
            synthesizer: MetricsSynthesizer::new(cfg.metrics.clone()),
            history: MetricHistory::new(cfg.metrics.history_capacity),
            events: EventLog::new(cfg.events.capacity),
            run_state: RunState::Stopped,
            seeded: false,
            cfg,
        };
        sim.announce();
        sim
    }

    fn announce(&mut self) {
        let config = self.controller.cluster_config();
        self.events
            .info(self.timeline.now(), format!("Cluster initialized: {config}"));
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn now(&self) -> Duration {
        self.timeline.now()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn controller(&self) -> &ClusterTopologyController {
        &self.controller
    }

    pub fn demand_phase(&self) -> DemandPhase {
        self.demand.phase()
    }

    pub fn history(&self) -> &MetricHistory {
        &self.history
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Start the loop; resumes when paused, no-op when running.
    pub fn start(&mut self) {
        match self.run_state {
            RunState::Running => {}
            RunState::Paused => self.resume(),
            RunState::Stopped => {
                self.run_state = RunState::Running;
                if !self.seeded {
                    self.seed();
                }
                info!(now_ms = as_millis(self.now()), "simulation started");
                self.events.info(self.now(), "Simulation started");
            }
        }
    }

    /// Prime the timers for a fresh run: first tick now, the demand cycle,
    /// and the first-cycle trigger.
    fn seed(&mut self) {
        self.seeded = true;
        self.timeline.schedule_in(Duration::ZERO, TimerKind::Tick);
        self.schedule_demand();
        let (now, phase) = (self.now(), self.demand.phase());
        self.trigger.on_demand_change(
            self.demand.previous(),
            phase,
            now,
            self.controller.is_small(),
            self.controller.is_large(),
        );
        self.schedule_trigger_check();
    }

    pub fn pause(&mut self) {
        if self.run_state == RunState::Running {
            self.run_state = RunState::Paused;
            info!(now_ms = as_millis(self.now()), "simulation paused");
            self.events.info(self.now(), "Simulation paused");
        }
    }

    pub fn resume(&mut self) {
        if self.run_state == RunState::Paused {
            self.run_state = RunState::Running;
            info!(now_ms = as_millis(self.now()), "simulation resumed");
            self.events.info(self.now(), "Simulation resumed");
        }
    }

    /// Reinitialize every entity. Timers from before the reset are left
    /// queued and discard themselves.
    pub fn reset(&mut self) {
        self.timeline.reset();
        self.controller.reset();
        self.demand.reset();
        self.trigger.reset();
        self.synthesizer.reset();
        self.history.clear();
        self.events.clear();
        self.run_state = RunState::Stopped;
        self.seeded = false;
        info!(
            generation = self.timeline.generation(),
            stale_timers = self.timeline.pending(),
            "simulation reset"
        );
        self.announce();
    }

    /// Scale out now, bypassing the trigger.
    pub fn force_scale_out(&mut self) -> Result<(), ScaleRejected> {
        let dwell = self.controller.scale_out(self.timeline.now(), &mut self.events)?;
        self.schedule_step(dwell);
        Ok(())
    }

    /// Scale in now, bypassing the trigger.
    pub fn force_scale_in(&mut self) -> Result<(), ScaleRejected> {
        let dwell = self.controller.scale_in(self.timeline.now(), &mut self.events)?;
        self.schedule_step(dwell);
        Ok(())
    }

    /// Leave Failed; restarts the operation when it failed before handover.
    /// A failure after the handover is treated as a completed scale, so the
    /// trigger moves the cycle on.
    pub fn retry(&mut self) -> Result<(), ScaleRejected> {
        match self.controller.retry(self.timeline.now(), &mut self.events)? {
            Recovery::Restarted(dwell) => self.schedule_step(dwell),
            Recovery::Acknowledged { direction } => self.on_scale_completed(direction),
        }
        Ok(())
    }

    // ── Time ────────────────────────────────────────────────────────

    /// Advance logical time by `dt`, firing every due timer in order.
    /// Does nothing unless running.
    pub fn advance(&mut self, dt: Duration) {
        if self.run_state != RunState::Running {
            return;
        }
        let until = self.timeline.now().saturating_add(dt);
        while let Some(kind) = self.timeline.pop_due(until) {
            self.fire(kind);
        }
        self.timeline.settle(until);
    }

    fn fire(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Tick => self.tick(),
            TimerKind::DemandAdvance { epoch } => {
                let now = self.now();
                if let Some(change) = self.demand.advance(now, epoch, &mut self.events) {
                    self.on_demand_change(change);
                }
            }
            TimerKind::Workflow(step) => self.run_step(step),
            TimerKind::TriggerCheck { arm } => {
                if arm != self.trigger.arm_seq() {
                    debug!(arm, current = self.trigger.arm_seq(), "discarding stale trigger check");
                    return;
                }
                self.check_trigger();
            }
        }
    }

    fn tick(&mut self) {
        let now = self.now();
        let input = TickInput {
            now,
            demand_phase: self.demand.phase(),
            phase_elapsed: self.demand.elapsed(now),
            scaling_phase: self.controller.phase(),
            cluster_config: self.controller.cluster_config(),
            last_handover: self.events.last_handover(),
        };
        let sample = self.synthesizer.sample(&input);
        self.history.push(sample);
        self.timeline
            .schedule_in(self.cfg.clock.tick_interval, TimerKind::Tick);
    }

    fn run_step(&mut self, step: WorkflowStep) {
        let before = self.controller.phase();
        let direction = self.controller.direction();
        let now = self.now();

        if let Some(dwell) = self.controller.advance(step, now, &mut self.events) {
            self.schedule_step(dwell);
        }

        if before != ScalingPhase::Completed && self.controller.phase() == ScalingPhase::Completed {
            self.on_scale_completed(direction);
        }
    }

    fn on_scale_completed(&mut self, direction: ScalingDirection) {
        let now = self.now();
        let action = self
            .trigger
            .on_scale_completed(direction, self.demand.phase(), now);
        if let Some(action) = action {
            self.act(action);
        }
        self.schedule_trigger_check();
    }

    fn on_demand_change(&mut self, change: DemandChange) {
        self.schedule_demand();
        self.trigger.on_demand_change(
            Some(change.from),
            change.to,
            self.now(),
            self.controller.is_small(),
            self.controller.is_large(),
        );
        self.schedule_trigger_check();
    }

    fn check_trigger(&mut self) {
        let m = &self.cfg.metrics;
        let view = TriggerView {
            now: self.now(),
            demand_phase: self.demand.phase(),
            scaling_phase: self.controller.phase(),
            is_small: self.controller.is_small(),
            is_large: self.controller.is_large(),
            stable: self.history.is_stable(m.stability_window, m.stability_spread),
        };
        if let Some(action) = self.trigger.evaluate(&view) {
            self.act(action);
        }
        self.schedule_trigger_check();
    }

    fn act(&mut self, action: TriggerAction) {
        let result = match action {
            TriggerAction::ScaleOut => self.force_scale_out(),
            TriggerAction::ScaleIn => self.force_scale_in(),
            TriggerAction::ForceRampUp => {
                let now = self.now();
                let change = self.demand.force(DemandPhase::RampUp, now, &mut self.events);
                self.on_demand_change(change);
                Ok(())
            }
        };
        if let Err(rejected) = result {
            warn!(?action, reason = %rejected, "trigger action rejected");
        }
    }

    fn schedule_step(&mut self, dwell: Dwell) {
        self.timeline
            .schedule_in(dwell.after, TimerKind::Workflow(dwell.step));
    }

    fn schedule_demand(&mut self) {
        if let Some(at) = self.demand.next_change_at() {
            let epoch = self.demand.epoch();
            self.timeline.schedule_at(at, TimerKind::DemandAdvance { epoch });
        }
    }

    fn schedule_trigger_check(&mut self) {
        if let Some(at) = self.trigger.next_check(self.now()) {
            let arm = self.trigger.arm_seq();
            self.timeline.schedule_at(at, TimerKind::TriggerCheck { arm });
        }
    }

    // ── Views ───────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            zones: self.controller.zones().to_vec(),
            scaling_phase: self.controller.phase(),
            scaling_direction: self.controller.direction(),
            cluster_config: self.controller.cluster_config(),
            demand_phase: self.demand.phase(),
            demand_cycle: self.demand.cycle(),
            run_state: self.run_state,
            generation: self.timeline.generation(),
            now_ms: as_millis(self.now()),
        }
    }

    pub fn view(&self) -> Arc<SimulationView> {
        Arc::new(SimulationView {
            snapshot: self.snapshot(),
            samples: self.history.recent(self.history.capacity()),
            events: self.events.to_vec(),
            failure: self.controller.failure_reason(),
            display_window: self.cfg.metrics.display_window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoneshift_core::{EventKind, ScalingError};
    use zoneshift_topology::{OperatorStep, ScriptedOperator};

    fn quiet_config() -> SimConfig {
        let mut cfg = SimConfig::default();
        cfg.metrics.jitter = 0.0;
        cfg
    }

    /// Step the clock in 100ms increments, checking topology invariants
    /// after each step, until `done` holds or `limit` elapses.
    fn run_until(sim: &mut Simulation, limit: Duration, mut done: impl FnMut(&Simulation) -> bool) -> bool {
        let step = Duration::from_millis(100);
        let end = sim.now() + limit;
        while sim.now() < end {
            sim.advance(step);
            sim.controller().check_invariants().unwrap();
            if done(sim) {
                return true;
            }
        }
        false
    }

    #[test]
    fn starts_stopped_with_startup_event() {
        let sim = Simulation::new(quiet_config());
        let snap = sim.snapshot();
        assert_eq!(snap.run_state, RunState::Stopped);
        assert_eq!(snap.primary_ids(), vec![1, 2]);
        assert_eq!(snap.now_ms, 0);
        assert_eq!(sim.events().len(), 1);
    }

    #[test]
    fn stopped_clock_does_not_move() {
        let mut sim = Simulation::new(quiet_config());
        sim.advance(Duration::from_secs(5));
        assert_eq!(sim.now(), Duration::ZERO);
        assert!(sim.history().is_empty());
    }

    #[test]
    fn one_sample_per_tick() {
        let mut sim = Simulation::new(quiet_config());
        sim.start();
        sim.advance(Duration::from_millis(4500));
        // Ticks at 0, 1, 2, 3, 4 s.
        assert_eq!(sim.history().len(), 5);
        assert_eq!(sim.history().latest().unwrap().timestamp_ms, 4000);
    }

    #[test]
    fn full_cycle_scales_out_then_in() {
        let mut sim = Simulation::new(quiet_config());
        sim.start();

        // First cycle: scale-out shortly after start.
        assert!(run_until(&mut sim, Duration::from_secs(5), |s| {
            s.controller().phase() == ScalingPhase::AddingZones
        }));
        assert_eq!(sim.controller().direction(), ScalingDirection::ScaleOut);

        // Scale-out completes in Steady and forces the ramp.
        assert!(run_until(&mut sim, Duration::from_secs(15), |s| {
            s.demand_phase() == DemandPhase::RampUp
        }));
        assert_eq!(sim.controller().cluster_config().servers_per_zone, 4);
        assert_eq!(sim.snapshot().primary_ids(), vec![3, 4]);

        // Peak, ramp down, back to Steady; then scale-in once stable.
        assert!(run_until(&mut sim, Duration::from_secs(60), |s| {
            s.controller().direction() == ScalingDirection::ScaleIn
        }));
        assert_eq!(sim.demand_phase(), DemandPhase::Steady);

        assert!(run_until(&mut sim, Duration::from_secs(20), |s| {
            s.controller().phase() == ScalingPhase::Idle
        }));
        assert_eq!(sim.controller().cluster_config().servers_per_zone, 2);
        assert_eq!(sim.snapshot().primary_ids(), vec![1, 2]);
        assert_eq!(sim.snapshot().demand_cycle, 1);

        let markers = sim.events().iter().filter(|e| e.is_handover_marker).count();
        assert_eq!(markers, 2);
    }

    #[test]
    fn scale_in_waits_for_stable_traffic() {
        let mut sim = Simulation::new(quiet_config());
        sim.start();
        assert!(run_until(&mut sim, Duration::from_secs(120), |s| {
            s.controller().direction() == ScalingDirection::ScaleIn
        }));
        let m = &sim.config().metrics;
        assert!(sim.history().is_stable(m.stability_window, m.stability_spread));
    }

    #[test]
    fn next_cycle_scale_out_after_delay() {
        let mut sim = Simulation::new(quiet_config());
        sim.start();
        assert!(run_until(&mut sim, Duration::from_secs(120), |s| {
            s.controller().direction() == ScalingDirection::ScaleIn
        }));
        assert!(run_until(&mut sim, Duration::from_secs(20), |s| {
            s.controller().phase() == ScalingPhase::Idle
        }));
        let idle_at = sim.now();

        assert!(run_until(&mut sim, Duration::from_secs(60), |s| {
            s.controller().direction() == ScalingDirection::ScaleOut
        }));
        let waited = sim.now() - idle_at;
        assert!(waited >= Duration::from_secs(25), "scale-out came after {waited:?}");
    }

    #[test]
    fn forced_scale_out_in_steady_forces_ramp_up() {
        let mut cfg = quiet_config();
        cfg.trigger.first_cycle_delay = Duration::from_secs(3600);
        let mut sim = Simulation::new(cfg);
        sim.start();

        sim.force_scale_out().unwrap();
        assert!(run_until(&mut sim, Duration::from_secs(15), |s| {
            s.demand_phase() == DemandPhase::RampUp
        }));
        assert_eq!(sim.controller().phase(), ScalingPhase::Completed);
    }

    #[test]
    fn forced_commands_report_rejections() {
        let mut sim = Simulation::new(quiet_config());
        assert_eq!(
            sim.force_scale_in().unwrap_err(),
            ScaleRejected::NothingToDo { servers_per_zone: 2 }
        );
        sim.force_scale_out().unwrap();
        assert!(sim.force_scale_out().unwrap_err().is_contention());
        assert!(matches!(sim.retry(), Err(ScaleRejected::NotFailed { .. })));
    }

    #[test]
    fn pause_freezes_the_clock() {
        let mut sim = Simulation::new(quiet_config());
        sim.start();
        sim.advance(Duration::from_millis(1500));
        assert_eq!(sim.controller().phase(), ScalingPhase::AddingZones);

        sim.pause();
        let frozen = sim.snapshot();
        let samples = sim.history().len();
        sim.advance(Duration::from_secs(30));
        assert_eq!(sim.snapshot(), frozen);
        assert_eq!(sim.history().len(), samples);

        sim.start();
        assert_eq!(sim.run_state(), RunState::Running);
        assert!(run_until(&mut sim, Duration::from_secs(15), |s| {
            s.controller().phase() == ScalingPhase::Completed
        }));
    }

    #[test]
    fn reset_is_idempotent_from_every_phase() {
        let mut scout = Simulation::new(quiet_config());
        scout.start();
        let mut seen = Vec::new();
        run_until(&mut scout, Duration::from_secs(15), |s| {
            let phase = s.controller().phase();
            if !seen.contains(&phase) {
                seen.push(phase);
            }
            false
        });
        assert!(seen.len() >= 5, "visited {seen:?}");

        for target in seen {
            let mut sim = Simulation::new(quiet_config());
            sim.start();
            assert!(run_until(&mut sim, Duration::from_secs(15), |s| s.controller().phase() == target));

            sim.reset();
            let once = sim.snapshot();
            let events = sim.events().to_vec();
            sim.reset();
            let twice = sim.snapshot();

            assert_eq!(once.zones, twice.zones);
            assert_eq!(twice.scaling_phase, ScalingPhase::Idle);
            assert_eq!(twice.scaling_direction, ScalingDirection::None);
            assert_eq!(twice.run_state, RunState::Stopped);
            assert_eq!(twice.now_ms, 0);
            assert_eq!(twice.primary_ids(), vec![1, 2]);
            assert_eq!(twice.generation, once.generation + 1);
            assert_eq!(sim.events().to_vec(), events);
            assert!(sim.history().is_empty());
            sim.controller().check_invariants().unwrap();
        }
    }

    #[test]
    fn stale_workflow_timers_are_discarded_after_reset() {
        let mut cfg = quiet_config();
        cfg.trigger.first_cycle_delay = Duration::from_secs(3600);
        let mut sim = Simulation::new(cfg);
        sim.start();
        sim.force_scale_out().unwrap();
        sim.advance(Duration::from_millis(1500));
        assert_eq!(sim.controller().phase(), ScalingPhase::AddingZones);

        sim.reset();
        sim.start();
        // The old Replicate step comes due at 3s and must not touch the
        // fresh cluster.
        sim.advance(Duration::from_secs(10));
        assert_eq!(sim.controller().phase(), ScalingPhase::Idle);
        assert_eq!(sim.controller().zones().len(), 2);
        assert_eq!(sim.snapshot().primary_ids(), vec![1, 2]);
        assert_eq!(sim.events().last_handover(), None);
        // Only the current generation's ticks produced samples.
        assert_eq!(sim.history().len(), 11);
    }

    #[test]
    fn handover_dip_is_bounded_by_pre_marker_value() {
        let mut sim = Simulation::new(quiet_config());
        sim.start();
        assert!(run_until(&mut sim, Duration::from_secs(10), |s| {
            s.events().last_handover().is_some()
        }));
        let marker_ms = as_millis(sim.events().last_handover().unwrap_or_default());
        let before = sim
            .history()
            .recent(100)
            .iter()
            .rev()
            .find(|s| s.timestamp_ms < marker_ms)
            .map(|s| s.qps)
            .unwrap();

        run_until(&mut sim, Duration::from_secs(3), |_| false);
        let during: Vec<f64> = sim
            .history()
            .recent(100)
            .iter()
            .filter(|s| s.timestamp_ms >= marker_ms && s.timestamp_ms < marker_ms + 2000)
            .map(|s| s.qps)
            .collect();
        assert!(!during.is_empty());
        assert!(during.iter().all(|q| *q <= before + 1e-9));
    }

    #[test]
    fn failed_scale_out_can_be_retried() {
        let script = ScriptedOperator::new();
        script.fail_times(
            OperatorStep::Create,
            ScalingError::ZoneCreateFailure("out of capacity".into()),
            4,
        );
        let mut sim = Simulation::with_operator(quiet_config(), Box::new(script.clone()));
        sim.start();

        assert!(run_until(&mut sim, Duration::from_secs(30), |s| {
            s.controller().phase() == ScalingPhase::Failed
        }));
        let view = sim.view();
        assert!(view.failure.as_deref().unwrap_or_default().contains("out of capacity"));
        assert_eq!(view.events[0].kind, EventKind::Error);
        assert_eq!(view.snapshot.zones.len(), 2);

        sim.retry().unwrap();
        assert!(run_until(&mut sim, Duration::from_secs(15), |s| {
            s.controller().phase() == ScalingPhase::Completed
        }));
        assert_eq!(sim.snapshot().primary_ids(), vec![3, 4]);
    }

    #[test]
    fn retry_after_failed_retirement_resumes_the_cycle() {
        let script = ScriptedOperator::new();
        script.fail_times(
            OperatorStep::Retire,
            ScalingError::ZoneRetireFailure("volume busy".into()),
            4,
        );
        let mut sim = Simulation::with_operator(quiet_config(), Box::new(script));
        sim.start();

        assert!(run_until(&mut sim, Duration::from_secs(60), |s| {
            s.controller().phase() == ScalingPhase::Failed
        }));
        assert_eq!(sim.demand_phase(), DemandPhase::Steady);
        assert_eq!(sim.controller().cluster_config().servers_per_zone, 4);

        // The handover already happened, so the scale-out counts as done
        // and demand leaves Steady right away.
        sim.retry().unwrap();
        assert_eq!(sim.controller().phase(), ScalingPhase::Idle);
        assert_eq!(sim.demand_phase(), DemandPhase::RampUp);

        // The rest of the cycle runs: back to Steady, then a scale-in.
        assert!(run_until(&mut sim, Duration::from_secs(120), |s| {
            s.controller().direction() == ScalingDirection::ScaleIn
        }));
        assert!(run_until(&mut sim, Duration::from_secs(20), |s| {
            s.controller().phase() == ScalingPhase::Idle
        }));
        assert_eq!(sim.controller().cluster_config().servers_per_zone, 2);
    }

    #[test]
    fn reset_clears_failed_state() {
        let script = ScriptedOperator::new();
        script.fail_times(
            OperatorStep::TransferPrimary,
            ScalingError::HandoverConflict("split brain".into()),
            1,
        );
        let mut sim = Simulation::with_operator(quiet_config(), Box::new(script));
        sim.start();
        assert!(run_until(&mut sim, Duration::from_secs(10), |s| {
            s.controller().phase() == ScalingPhase::Failed
        }));
        assert!(matches!(sim.force_scale_out(), Err(ScaleRejected::Failed { .. })));

        sim.reset();
        let snap = sim.snapshot();
        assert_eq!(snap.scaling_phase, ScalingPhase::Idle);
        assert_eq!(snap.primary_ids(), vec![1, 2]);
        assert_eq!(sim.view().failure, None);
        sim.controller().check_invariants().unwrap();
    }

    #[test]
    fn view_exposes_display_window() {
        let mut sim = Simulation::new(quiet_config());
        sim.start();
        sim.advance(Duration::from_secs(80));
        let view = sim.view();
        assert_eq!(view.samples.len(), 81);
        assert_eq!(view.recent_samples(view.display_window).len(), 60);
        assert_eq!(view.recent_samples(view.display_window).last().unwrap().timestamp_ms, 80_000);
    }
}
