//! Shared domain types for the zoneshift control loop.
//!
//! These types describe the cluster topology, the scaling and demand state
//! machines, and the immutable records (samples, events) handed to the
//! presentation layer. All of them serialize to JSON for the REST surface.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier of a zone. Pairs alternate between `{1, 2}` and `{3, 4}`.
pub type ZoneId = u32;

/// Number of zones in every stable configuration.
pub const ZONES_PER_CONFIG: u32 = 2;

// ── Zones ──────────────────────────────────────────────────────────

/// Write-leadership role of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneRole {
    Primary,
    Secondary,
}

/// Lifecycle of a zone inside a scale workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneLifecycle {
    /// Serving member of the current configuration.
    Stable,
    /// Created by an in-flight workflow, not yet primary.
    New,
    /// Former primary pair after a handover.
    Old,
    /// Draining before removal.
    Deleting,
}

/// A fault-domain group of replica servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub role: ZoneRole,
    /// Number of observer servers in this zone.
    pub observer_count: u32,
    pub lifecycle: ZoneLifecycle,
}

impl Zone {
    pub fn new(id: ZoneId, observer_count: u32, role: ZoneRole, lifecycle: ZoneLifecycle) -> Self {
        Self {
            id,
            name: format!("zone-{id}"),
            role,
            observer_count,
            lifecycle,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == ZoneRole::Primary
    }
}

/// One of the two stable cluster shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub zone_count: u32,
    pub servers_per_zone: u32,
}

impl ClusterConfig {
    pub fn with_servers(servers_per_zone: u32) -> Self {
        Self {
            zone_count: ZONES_PER_CONFIG,
            servers_per_zone,
        }
    }
}

impl fmt::Display for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} zones × {} servers", self.zone_count, self.servers_per_zone)
    }
}

// ── Scaling state machine ──────────────────────────────────────────

/// Phase of the cluster-wide scale workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingPhase {
    Idle,
    AddingZones,
    SwitchingPrimary,
    RetiringZones,
    Completed,
    /// Retries exhausted; blocks scaling until reset or retry.
    Failed,
}

impl ScalingPhase {
    /// Phases during which old and new pairs coexist.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ScalingPhase::AddingZones | ScalingPhase::SwitchingPrimary | ScalingPhase::RetiringZones
        )
    }

    /// Number of zones that must exist while in this phase.
    pub fn expected_zone_count(self) -> usize {
        if self.is_transitional() {
            2 * ZONES_PER_CONFIG as usize
        } else {
            ZONES_PER_CONFIG as usize
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScalingPhase::Idle => "idle",
            ScalingPhase::AddingZones => "adding_zones",
            ScalingPhase::SwitchingPrimary => "switching_primary",
            ScalingPhase::RetiringZones => "retiring_zones",
            ScalingPhase::Completed => "completed",
            ScalingPhase::Failed => "failed",
        }
    }

    pub const ALL: [ScalingPhase; 6] = [
        ScalingPhase::Idle,
        ScalingPhase::AddingZones,
        ScalingPhase::SwitchingPrimary,
        ScalingPhase::RetiringZones,
        ScalingPhase::Completed,
        ScalingPhase::Failed,
    ];
}

impl fmt::Display for ScalingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the in-flight workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDirection {
    ScaleOut,
    ScaleIn,
    None,
}

impl fmt::Display for ScalingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalingDirection::ScaleOut => "scale-out",
            ScalingDirection::ScaleIn => "scale-in",
            ScalingDirection::None => "none",
        })
    }
}

// ── Demand ─────────────────────────────────────────────────────────

/// Stage of the synthetic traffic pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandPhase {
    Steady,
    RampUp,
    Peak,
    RampDown,
}

impl DemandPhase {
    /// The phase that follows this one in the cycle.
    pub fn next(self) -> Self {
        match self {
            DemandPhase::Steady => DemandPhase::RampUp,
            DemandPhase::RampUp => DemandPhase::Peak,
            DemandPhase::Peak => DemandPhase::RampDown,
            DemandPhase::RampDown => DemandPhase::Steady,
        }
    }

    pub fn is_ramp(self) -> bool {
        matches!(self, DemandPhase::RampUp | DemandPhase::RampDown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DemandPhase::Steady => "steady",
            DemandPhase::RampUp => "ramp_up",
            DemandPhase::Peak => "peak",
            DemandPhase::RampDown => "ramp_down",
        }
    }
}

impl fmt::Display for DemandPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Published records ──────────────────────────────────────────────

/// One throughput sample. Created once per tick, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub qps: f64,
    pub tps: f64,
    /// Logical milliseconds since the last reset.
    pub timestamp_ms: u64,
    pub demand_phase: DemandPhase,
    pub scaling_phase: ScalingPhase,
    pub cluster_config: ClusterConfig,
}

/// Severity of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Success,
    Warning,
    Error,
}

/// A lifecycle or demand notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: u64,
    pub timestamp_ms: u64,
    pub kind: EventKind,
    pub message: String,
    /// Set on the event emitted at the primary-role flip.
    pub is_handover_marker: bool,
}

/// Whether the logical clock is advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// The subscribable view of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub zones: Vec<Zone>,
    pub scaling_phase: ScalingPhase,
    pub scaling_direction: ScalingDirection,
    pub cluster_config: ClusterConfig,
    pub demand_phase: DemandPhase,
    /// Demand cycles completed since the last reset.
    pub demand_cycle: u64,
    pub run_state: RunState,
    /// Incremented by every reset.
    pub generation: u64,
    pub now_ms: u64,
}

impl ClusterSnapshot {
    /// Ids of the zones currently holding the primary role, ascending.
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
}

/// Logical time as whole milliseconds.
pub fn as_millis(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
