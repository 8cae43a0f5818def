//! Error types for the zoneshift control loop.

use thiserror::Error;

use crate::types::{ScalingDirection, ScalingPhase};

/// Failures of the operations standing behind each workflow dwell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScalingError {
    #[error("replication did not converge within {waited_ms}ms")]
    ReplicationTimeout { waited_ms: u64 },

    #[error("handover conflict: {0}")]
    HandoverConflict(String),

    #[error("zone creation failed: {0}")]
    ZoneCreateFailure(String),

    #[error("zone retirement failed: {0}")]
    ZoneRetireFailure(String),
}

impl ScalingError {
    /// Whether the failed step may be retried with backoff.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ScalingError::HandoverConflict(_))
    }
}

/// Why a scale command was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleRejected {
    #[error("{direction} already in progress (phase {phase})")]
    InProgress {
        phase: ScalingPhase,
        direction: ScalingDirection,
    },

    #[error("nothing to do: cluster already at {servers_per_zone} servers per zone")]
    NothingToDo { servers_per_zone: u32 },

    #[error("previous scale operation failed: {reason}")]
    Failed { reason: String },

    #[error("no failed operation to retry (phase {phase})")]
    NotFailed { phase: ScalingPhase },
}

impl ScaleRejected {
    /// True when the rejection is caused by another operation holding the cluster.
    pub fn is_contention(&self) -> bool {
        matches!(self, ScaleRejected::InProgress { .. })
    }
}

/// Errors loading or validating a [`SimConfig`](crate::config::SimConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
