//! zoneshift.toml configuration.
//!
//! Every duration, threshold and easing parameter used by the control loop
//! lives here, so tests can pin them and deployments can tune pacing
//! without touching code. All sections and fields are optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{serde_duration, serde_opt_duration};
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub clock: ClockConfig,
    pub topology: TopologyConfig,
    pub demand: DemandConfig,
    pub metrics: MetricsConfig,
    pub trigger: TriggerConfig,
    pub events: EventsConfig,
}

/// Logical clock pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    /// Interval between metric samples.
    #[serde(with = "serde_duration")]
    pub tick_interval: Duration,
    /// Wall-clock granularity of the driver loop.
    #[serde(with = "serde_duration")]
    pub resolution: Duration,
    /// Logical seconds per wall-clock second.
    pub speed: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            resolution: Duration::from_millis(100),
            speed: 1.0,
        }
    }
}

/// Scale workflow dwells and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopologyConfig {
    pub small_servers: u32,
    pub large_servers: u32,
    #[serde(with = "serde_duration")]
    pub replication_dwell: Duration,
    #[serde(with = "serde_duration")]
    pub handover_dwell: Duration,
    #[serde(with = "serde_duration")]
    pub drain_dwell: Duration,
    #[serde(with = "serde_duration")]
    pub completed_dwell: Duration,
    /// Upper bound on time spent in AddingZones.
    #[serde(with = "serde_duration")]
    pub replication_timeout: Duration,
    /// Retries per step before the workflow fails.
    pub max_retries: u32,
    #[serde(with = "serde_duration")]
    pub retry_backoff: Duration,
    #[serde(with = "serde_duration")]
    pub retry_backoff_max: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            small_servers: 2,
            large_servers: 4,
            replication_dwell: Duration::from_secs(3),
            handover_dwell: Duration::from_secs(2),
            drain_dwell: Duration::from_secs(3),
            completed_dwell: Duration::from_secs(2),
            replication_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(8),
        }
    }
}

impl TopologyConfig {
    /// Backoff before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.retry_backoff_max)
    }
}

/// Demand phase durations. `steady = None` holds Steady until forced out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemandConfig {
    #[serde(with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub steady: Option<Duration>,
    #[serde(with = "serde_duration")]
    pub ramp_up: Duration,
    #[serde(with = "serde_duration")]
    pub peak: Duration,
    #[serde(with = "serde_duration")]
    pub ramp_down: Duration,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            steady: None,
            ramp_up: Duration::from_secs(10),
            peak: Duration::from_secs(20),
            ramp_down: Duration::from_secs(10),
        }
    }
}

/// Throughput model parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub steady_qps: f64,
    pub steady_tps: f64,
    pub peak_qps: f64,
    pub peak_tps: f64,
    /// Length of the smoothstep ramp between steady and peak.
    #[serde(with = "serde_duration")]
    pub ramp_window: Duration,
    /// Window at ramp entry over which smoothing hands off to the ramp curve.
    #[serde(with = "serde_duration")]
    pub blend_window: Duration,
    /// Exponential smoothing factor per tick.
    pub smoothing: f64,
    #[serde(with = "serde_duration")]
    pub dip_duration: Duration,
    #[serde(with = "serde_duration")]
    pub recovery_duration: Duration,
    /// Fraction of the pre-handover value reached at the bottom of the dip.
    pub dip_floor: f64,
    /// Half-width of the multiplicative jitter band.
    pub jitter: f64,
    /// Seed for the jitter source; random when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub history_capacity: usize,
    pub display_window: usize,
    pub stability_window: usize,
    pub stability_spread: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            steady_qps: 5000.0,
            steady_tps: 4000.0,
            peak_qps: 28000.0,
            peak_tps: 22000.0,
            ramp_window: Duration::from_secs(10),
            blend_window: Duration::from_secs(1),
            smoothing: 0.3,
            dip_duration: Duration::from_millis(800),
            recovery_duration: Duration::from_millis(1200),
            dip_floor: 0.9,
            jitter: 0.005,
            seed: None,
            history_capacity: 100,
            display_window: 60,
            stability_window: 5,
            stability_spread: 500.0,
        }
    }
}

impl MetricsConfig {
    /// Total length of the handover dip model.
    pub fn dip_window(&self) -> Duration {
        self.dip_duration + self.recovery_duration
    }
}

/// Autoscale trigger pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    /// Wait after RampDown → Steady before polling stability.
    #[serde(with = "serde_duration")]
    pub settle_delay: Duration,
    /// Delay before the very first scale-out.
    #[serde(with = "serde_duration")]
    pub first_cycle_delay: Duration,
    /// Delay before scale-outs of later cycles.
    #[serde(with = "serde_duration")]
    pub next_cycle_delay: Duration,
    /// Re-check period while an armed action waits.
    #[serde(with = "serde_duration")]
    pub poll_interval: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            first_cycle_delay: Duration::from_secs(1),
            next_cycle_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

impl SimConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.clock.tick_interval.is_zero() {
            return invalid("clock.tick_interval must be positive");
        }
        if self.clock.resolution.is_zero() {
            return invalid("clock.resolution must be positive");
        }
        if !(self.clock.speed.is_finite() && self.clock.speed > 0.0) {
            return invalid("clock.speed must be a positive number");
        }
        if Duration::try_from_secs_f64(self.clock.resolution.as_secs_f64() * self.clock.speed).is_err() {
            return invalid("clock.speed is too large for clock.resolution");
        }
        if self.topology.small_servers == 0
            || self.topology.small_servers >= self.topology.large_servers
        {
            return invalid("topology.small_servers must be positive and below large_servers");
        }
        if self.demand.steady.is_some_and(|d| d.is_zero())
            || self.demand.ramp_up.is_zero()
            || self.demand.peak.is_zero()
            || self.demand.ramp_down.is_zero()
        {
            return invalid("demand phase durations must be positive");
        }
        let m = &self.metrics;
        if !(0.0..=1.0).contains(&m.smoothing) {
            return invalid("metrics.smoothing must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&m.dip_floor) {
            return invalid("metrics.dip_floor must be within [0, 1]");
        }
        if !(0.0..0.5).contains(&m.jitter) {
            return invalid("metrics.jitter must be within [0, 0.5)");
        }
        if m.ramp_window.is_zero() {
            return invalid("metrics.ramp_window must be positive");
        }
        if m.history_capacity == 0 || m.stability_window == 0 {
            return invalid("metrics history and stability window must be positive");
        }
        if m.display_window > m.history_capacity || m.stability_window > m.history_capacity {
            return invalid("metrics windows cannot exceed history_capacity");
        }
        if self.trigger.poll_interval.is_zero() {
            return invalid("trigger.poll_interval must be positive");
        }
        if self.events.capacity == 0 {
            return invalid("events.capacity must be positive");
        }
        Ok(())
    }
}
