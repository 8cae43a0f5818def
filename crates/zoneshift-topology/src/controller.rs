//! Cluster topology controller — drives the scale workflow state machine.
//!
//! The controller moves the cluster between the small and large
//! configuration through AddingZones → SwitchingPrimary → RetiringZones →
//! Completed → Idle. It never sleeps: every transition returns the next
//! [`Dwell`] and the driver calls [`ClusterTopologyController::advance`]
//! once it has elapsed on the logical clock.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use zoneshift_core::{
    as_millis, ClusterConfig, EventKind, ScaleRejected, ScalingDirection, ScalingError,
    ScalingPhase, TopologyConfig, Zone, ZoneId, ZoneLifecycle, ZoneRole, ZONES_PER_CONFIG,
};

use crate::events::EventLog;
use crate::operator::ZoneOperator;

/// A step of the scale workflow, executed when its dwell elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    /// Create the new zones.
    Provision,
    /// Replication-convergence check at the end of the dwell.
    Replicate,
    /// Flip the primary role to the new pair.
    SwitchPrimary,
    /// Mark the old pair deleting and start draining.
    Retire,
    /// Remove the drained pair.
    Remove,
    /// Return to Idle after the completion display dwell.
    Finish,
}

/// The next step and how long to wait before running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dwell {
    pub step: WorkflowStep,
    pub after: Duration,
}

impl Dwell {
    fn new(step: WorkflowStep, after: Duration) -> Self {
        Self { step, after }
    }
}

/// How [`ClusterTopologyController::retry`] left the Failed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The operation failed before the handover and starts over.
    Restarted(Dwell),
    /// The operation failed after the handover. The cluster already runs
    /// at the target size, so the scale in `direction` counts as done.
    Acknowledged { direction: ScalingDirection },
}

/// The in-flight scale operation.
#[derive(Debug, Clone)]
struct Operation {
    direction: ScalingDirection,
    old_ids: Vec<ZoneId>,
    new_ids: Vec<ZoneId>,
    from_servers: u32,
    target_servers: u32,
    /// When AddingZones was entered.
    started_at: Duration,
    /// Retries consumed by the current step.
    attempts: u32,
    handed_over: bool,
}

/// A failed operation awaiting reset or retry.
#[derive(Debug, Clone)]
struct Failure {
    direction: ScalingDirection,
    error: ScalingError,
    handed_over: bool,
}

pub struct ClusterTopologyController {
    cfg: TopologyConfig,
    operator: Box<dyn ZoneOperator>,
    zones: Vec<Zone>,
    phase: ScalingPhase,
    direction: ScalingDirection,
    config: ClusterConfig,
    operation: Option<Operation>,
    failure: Option<Failure>,
}

impl ClusterTopologyController {
    pub fn new(cfg: TopologyConfig, operator: Box<dyn ZoneOperator>) -> Self {
        let servers = cfg.small_servers;
        Self {
            zones: initial_zones(servers),
            phase: ScalingPhase::Idle,
            direction: ScalingDirection::None,
            config: ClusterConfig::with_servers(servers),
            operation: None,
            failure: None,
            operator,
            cfg,
        }
    }

    /// Back to zones {1, 2} at the small size, Idle, no failure.
    pub fn reset(&mut self) {
        if let Some(op) = &self.operation {
            info!(direction = %op.direction, phase = %self.phase, "cancelling in-flight workflow");
        }
        self.zones = initial_zones(self.cfg.small_servers);
        self.phase = ScalingPhase::Idle;
        self.direction = ScalingDirection::None;
        self.config = ClusterConfig::with_servers(self.cfg.small_servers);
        self.operation = None;
        self.failure = None;
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn phase(&self) -> ScalingPhase {
        self.phase
    }

    pub fn direction(&self) -> ScalingDirection {
        self.direction
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        self.config
    }

    pub fn is_small(&self) -> bool {
        self.config.servers_per_zone == self.cfg.small_servers
    }

    pub fn is_large(&self) -> bool {
        self.config.servers_per_zone == self.cfg.large_servers
    }

    /// Why the last operation failed, while in Failed.
    pub fn failure_reason(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.error.to_string())
    }

    /// Ids of the zones holding the primary role, ascending.
    pub fn primary_ids(&self) -> Vec<ZoneId> {
        let mut ids: Vec<ZoneId> = self
            .zones
            .iter()
            .filter(|z| z.is_primary())
            .map(|z| z.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Start a scale-out from the small to the large configuration.
    pub fn scale_out(&mut self, now: Duration, log: &mut EventLog) -> Result<Dwell, ScaleRejected> {
        self.begin(ScalingDirection::ScaleOut, now, log)
    }

    /// Start a scale-in from the large to the small configuration.
    pub fn scale_in(&mut self, now: Duration, log: &mut EventLog) -> Result<Dwell, ScaleRejected> {
        self.begin(ScalingDirection::ScaleIn, now, log)
    }

    fn guard(&self, direction: ScalingDirection) -> Result<(), ScaleRejected> {
        match self.phase {
            ScalingPhase::Idle => {}
            ScalingPhase::Failed => {
                return Err(ScaleRejected::Failed {
                    reason: self.failure_reason().unwrap_or_default(),
                });
            }
            phase => {
                return Err(ScaleRejected::InProgress {
                    phase,
                    direction: self.direction,
                });
            }
        }

        let ready = match direction {
            ScalingDirection::ScaleOut => self.is_small(),
            ScalingDirection::ScaleIn => self.is_large(),
            ScalingDirection::None => false,
        };
        if !ready {
            return Err(ScaleRejected::NothingToDo {
                servers_per_zone: self.config.servers_per_zone,
            });
        }
        Ok(())
    }

    fn begin(
        &mut self,
        direction: ScalingDirection,
        now: Duration,
        log: &mut EventLog,
    ) -> Result<Dwell, ScaleRejected> {
        if let Err(rejected) = self.guard(direction) {
            warn!(%direction, reason = %rejected, "scale request rejected");
            return Err(rejected);
        }

        let old_ids = self.primary_ids();
        let new_ids = next_pair(&old_ids);
        let target_servers = match direction {
            ScalingDirection::ScaleIn => self.cfg.small_servers,
            _ => self.cfg.large_servers,
        };

        for id in &new_ids {
            self.zones
                .push(Zone::new(*id, target_servers, ZoneRole::Secondary, ZoneLifecycle::New));
        }
        self.phase = ScalingPhase::AddingZones;
        self.direction = direction;

        info!(
            %direction,
            old = ?old_ids,
            new = ?new_ids,
            servers = target_servers,
            "scale workflow started"
        );
        log.info(
            now,
            format!(
                "Starting {direction}: adding zones {} with {target_servers} servers each",
                fmt_ids(&new_ids)
            ),
        );

        self.operation = Some(Operation {
            direction,
            old_ids,
            new_ids,
            from_servers: self.config.servers_per_zone,
            target_servers,
            started_at: now,
            attempts: 0,
            handed_over: false,
        });
        Ok(Dwell::new(WorkflowStep::Provision, Duration::ZERO))
    }

    /// Run `step` now that its dwell has elapsed. Returns the next dwell,
    /// or `None` when the workflow ended (Idle or Failed) or the step is
    /// stale.
    pub fn advance(&mut self, step: WorkflowStep, now: Duration, log: &mut EventLog) -> Option<Dwell> {
        if !step_allowed(step, self.phase) {
            debug!(?step, phase = %self.phase, "ignoring step outside its phase");
            return None;
        }
        let Some(mut op) = self.operation.take() else {
            debug!(?step, "ignoring step with no workflow in flight");
            return None;
        };

        let outcome = match step {
            WorkflowStep::Provision => self.provision(&op, now, log),
            WorkflowStep::Replicate => self.replicate(&op, now, log),
            WorkflowStep::SwitchPrimary => self.switch_primary(&mut op, now, log),
            WorkflowStep::Retire => Ok(self.retire(&op, now, log)),
            WorkflowStep::Remove => self.remove(&op, now, log),
            WorkflowStep::Finish => {
                self.finish(&op);
                return None;
            }
        };

        match outcome {
            Ok(dwell) => {
                op.attempts = 0;
                self.operation = Some(op);
                Some(dwell)
            }
            Err(err) => self.retry_or_fail(op, step, err, now, log),
        }
    }

    fn provision(&mut self, op: &Operation, now: Duration, log: &mut EventLog) -> Result<Dwell, ScalingError> {
        self.operator.create_zones(&op.new_ids, op.target_servers)?;
        debug!(zones = ?op.new_ids, "zones provisioned");
        log.info(
            now,
            format!("Zones {} provisioned, replicating data", fmt_ids(&op.new_ids)),
        );
        Ok(Dwell::new(WorkflowStep::Replicate, self.cfg.replication_dwell))
    }

    fn replicate(&mut self, op: &Operation, now: Duration, log: &mut EventLog) -> Result<Dwell, ScalingError> {
        let waited = now.saturating_sub(op.started_at);
        if waited > self.cfg.replication_timeout {
            return Err(ScalingError::ReplicationTimeout {
                waited_ms: as_millis(waited),
            });
        }
        self.operator.await_replication(&op.new_ids)?;
        info!(zones = ?op.new_ids, waited_ms = as_millis(waited), "replication converged");
        log.info(
            now,
            format!("Replication converged on zones {}", fmt_ids(&op.new_ids)),
        );
        Ok(Dwell::new(WorkflowStep::SwitchPrimary, Duration::ZERO))
    }

    /// Hand the primary role to the new pair in one state update.
    fn switch_primary(
        &mut self,
        op: &mut Operation,
        now: Duration,
        log: &mut EventLog,
    ) -> Result<Dwell, ScalingError> {
        self.phase = ScalingPhase::SwitchingPrimary;
        self.validate_handover(op)?;
        self.operator.transfer_primary(&op.old_ids, &op.new_ids)?;

        let mut flipped = self.zones.clone();
        for zone in &mut flipped {
            if op.new_ids.contains(&zone.id) {
                zone.role = ZoneRole::Primary;
                zone.lifecycle = ZoneLifecycle::Stable;
            } else if op.old_ids.contains(&zone.id) {
                zone.role = ZoneRole::Secondary;
                zone.lifecycle = ZoneLifecycle::Old;
            }
        }
        self.zones = flipped;
        self.config = ClusterConfig::with_servers(op.target_servers);
        op.handed_over = true;

        info!(from = ?op.old_ids, to = ?op.new_ids, "primary handed over");
        log.push_handover(
            now,
            format!(
                "Primary handed over from zones {} to zones {}",
                fmt_ids(&op.old_ids),
                fmt_ids(&op.new_ids)
            ),
        );
        Ok(Dwell::new(WorkflowStep::Retire, self.cfg.handover_dwell))
    }

    /// The old pair must be the sole primary and the new pair present as
    /// secondaries before the flip.
    fn validate_handover(&self, op: &Operation) -> Result<(), ScalingError> {
        let primaries = self.primary_ids();
        if primaries != op.old_ids {
            return Err(ScalingError::HandoverConflict(format!(
                "expected zones {} to be primary, found {}",
                fmt_ids(&op.old_ids),
                fmt_ids(&primaries)
            )));
        }
        let staged = op.new_ids.iter().all(|id| {
            self.zones
                .iter()
                .any(|z| z.id == *id && z.role == ZoneRole::Secondary)
        });
        if !staged {
            return Err(ScalingError::HandoverConflict(format!(
                "zones {} are not staged as secondaries",
                fmt_ids(&op.new_ids)
            )));
        }
        Ok(())
    }

    fn retire(&mut self, op: &Operation, now: Duration, log: &mut EventLog) -> Dwell {
        self.phase = ScalingPhase::RetiringZones;
        for zone in &mut self.zones {
            if op.old_ids.contains(&zone.id) {
                zone.lifecycle = ZoneLifecycle::Deleting;
            }
        }
        log.info(now, format!("Draining zones {}", fmt_ids(&op.old_ids)));
        Dwell::new(WorkflowStep::Remove, self.cfg.drain_dwell)
    }

    fn remove(&mut self, op: &Operation, now: Duration, log: &mut EventLog) -> Result<Dwell, ScalingError> {
        self.operator.retire_zones(&op.old_ids)?;
        self.zones.retain(|z| !op.old_ids.contains(&z.id));
        self.phase = ScalingPhase::Completed;

        info!(direction = %op.direction, config = %self.config, "scale workflow completed");
        log.push(
            now,
            EventKind::Success,
            format!("{} completed: {}", capitalize(op.direction), self.config),
        );
        Ok(Dwell::new(WorkflowStep::Finish, self.cfg.completed_dwell))
    }

    fn finish(&mut self, op: &Operation) {
        debug!(direction = %op.direction, "returning to idle");
        self.phase = ScalingPhase::Idle;
        self.direction = ScalingDirection::None;
    }

    fn retry_or_fail(
        &mut self,
        mut op: Operation,
        step: WorkflowStep,
        err: ScalingError,
        now: Duration,
        log: &mut EventLog,
    ) -> Option<Dwell> {
        let replication_expired = step == WorkflowStep::Replicate
            && now.saturating_sub(op.started_at) > self.cfg.replication_timeout;

        if err.is_transient() && !replication_expired && op.attempts < self.cfg.max_retries {
            op.attempts += 1;
            let backoff = self.cfg.backoff(op.attempts);
            warn!(
                ?step,
                error = %err,
                attempt = op.attempts,
                max = self.cfg.max_retries,
                backoff_ms = as_millis(backoff),
                "workflow step failed, retrying"
            );
            log.push(
                now,
                EventKind::Warning,
                format!(
                    "{err}; retry {}/{} in {}ms",
                    op.attempts,
                    self.cfg.max_retries,
                    as_millis(backoff)
                ),
            );
            self.operation = Some(op);
            return Some(Dwell::new(step, backoff));
        }

        self.fail(op, err, now, log);
        None
    }

    /// Park the cluster at its last consistent configuration.
    fn fail(&mut self, op: Operation, err: ScalingError, now: Duration, log: &mut EventLog) {
        let failed_in = self.phase;
        if op.handed_over {
            self.zones.retain(|z| !op.old_ids.contains(&z.id));
        } else {
            self.zones.retain(|z| !op.new_ids.contains(&z.id));
            self.restore_primary(&op.old_ids);
            self.config = ClusterConfig::with_servers(op.from_servers);
        }
        self.phase = ScalingPhase::Failed;

        error!(direction = %op.direction, phase = %failed_in, error = %err, "scale workflow failed");
        log.push(
            now,
            EventKind::Error,
            format!("{} failed during {failed_in}: {err}", capitalize(op.direction)),
        );
        self.failure = Some(Failure {
            direction: op.direction,
            error: err,
            handed_over: op.handed_over,
        });
    }

    /// Make `ids` the sole primary pair.
    fn restore_primary(&mut self, ids: &[ZoneId]) {
        for zone in &mut self.zones {
            if ids.contains(&zone.id) {
                zone.role = ZoneRole::Primary;
                zone.lifecycle = ZoneLifecycle::Stable;
            } else {
                zone.role = ZoneRole::Secondary;
            }
        }
    }

    /// Leave Failed. Before the handover the same operation restarts;
    /// after it the failure is acknowledged and the cluster is Idle.
    pub fn retry(&mut self, now: Duration, log: &mut EventLog) -> Result<Recovery, ScaleRejected> {
        if self.phase != ScalingPhase::Failed {
            return Err(ScaleRejected::NotFailed { phase: self.phase });
        }
        let failure = self.failure.take();
        self.phase = ScalingPhase::Idle;
        self.direction = ScalingDirection::None;
        self.operation = None;

        match failure {
            Some(f) if !f.handed_over => {
                info!(direction = %f.direction, "retrying failed workflow");
                log.info(now, format!("Retrying {}", f.direction));
                self.begin(f.direction, now, log).map(Recovery::Restarted)
            }
            f => {
                let direction = f.map_or(ScalingDirection::None, |f| f.direction);
                info!(%direction, config = %self.config, "failure acknowledged");
                log.info(now, format!("Failure acknowledged, cluster at {}", self.config));
                Ok(Recovery::Acknowledged { direction })
            }
        }
    }

    /// Check the topology invariants for the current phase.
    pub fn check_invariants(&self) -> Result<(), String> {
        let expected = self.phase.expected_zone_count();
        if self.zones.len() != expected {
            return Err(format!(
                "phase {} requires {expected} zones, found {}",
                self.phase,
                self.zones.len()
            ));
        }

        let primaries = self.primary_ids();
        if primaries.len() != ZONES_PER_CONFIG as usize {
            return Err(format!("expected one primary pair, found {}", fmt_ids(&primaries)));
        }
        let pair_base = primaries[0];
        if pair_base % 2 != 1 || primaries[1] != pair_base + 1 {
            return Err(format!("primaries {} do not form a pair", fmt_ids(&primaries)));
        }

        let primary_size = self
            .zones
            .iter()
            .find(|z| z.is_primary())
            .map(|z| z.observer_count);
        if primary_size != Some(self.config.servers_per_zone) {
            return Err(format!(
                "config reports {} servers, primary pair has {primary_size:?}",
                self.config.servers_per_zone
            ));
        }

        let in_flight = self.operation.is_some();
        let idle_like = matches!(self.phase, ScalingPhase::Idle | ScalingPhase::Failed);
        if idle_like == in_flight {
            return Err(format!(
                "phase {} inconsistent with in-flight workflow = {in_flight}",
                self.phase
            ));
        }
        if (self.direction == ScalingDirection::None) != (self.phase == ScalingPhase::Idle) {
            return Err(format!(
                "direction {} inconsistent with phase {}",
                self.direction, self.phase
            ));
        }
        Ok(())
    }
}

/// Zones {1, 2} as the primary pair.
fn initial_zones(servers: u32) -> Vec<Zone> {
    (1..=ZONES_PER_CONFIG)
        .map(|id| Zone::new(id, servers, ZoneRole::Primary, ZoneLifecycle::Stable))
        .collect()
}

/// The id pair not currently in use: {1, 2} ↔ {3, 4}.
fn next_pair(current: &[ZoneId]) -> Vec<ZoneId> {
    let base = if current.contains(&1) {
        ZONES_PER_CONFIG + 1
    } else {
        1
    };
    (base..base + ZONES_PER_CONFIG).collect()
}

fn step_allowed(step: WorkflowStep, phase: ScalingPhase) -> bool {
    match step {
        WorkflowStep::Provision | WorkflowStep::Replicate => phase == ScalingPhase::AddingZones,
        WorkflowStep::SwitchPrimary => {
            matches!(phase, ScalingPhase::AddingZones | ScalingPhase::SwitchingPrimary)
        }
        WorkflowStep::Retire => phase == ScalingPhase::SwitchingPrimary,
        WorkflowStep::Remove => phase == ScalingPhase::RetiringZones,
        WorkflowStep::Finish => phase == ScalingPhase::Completed,
    }
}

fn fmt_ids(ids: &[ZoneId]) -> String {
    ids.iter()
        .map(ZoneId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn capitalize(direction: ScalingDirection) -> String {
    let text = direction.to_string();
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => text,
    }
}
