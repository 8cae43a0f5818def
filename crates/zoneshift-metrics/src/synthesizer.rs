//! Metrics synthesizer — the synthetic throughput model.
//!
//! Produces one [`MetricSample`] per tick. The underlying level follows a
//! target chosen by the demand phase: exponential smoothing toward a
//! constant for Steady/Peak, a smoothstep curve for the ramps. While the
//! primary role is being handed over, the emitted value dips below the
//! pre-handover level and recovers toward the underlying trajectory.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use zoneshift_core::{
    as_millis, ClusterConfig, DemandPhase, MetricSample, MetricsConfig, ScalingPhase,
};

/// A (qps, tps) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub qps: f64,
    pub tps: f64,
}

impl Throughput {
    pub fn new(qps: f64, tps: f64) -> Self {
        Self { qps, tps }
    }

    /// Linear interpolation from `self` (t = 0) to `other` (t = 1).
    pub fn lerp(self, other: Throughput, t: f64) -> Throughput {
        Throughput {
            qps: self.qps + (other.qps - self.qps) * t,
            tps: self.tps + (other.tps - self.tps) * t,
        }
    }

    pub fn scale(self, factor: f64) -> Throughput {
        Throughput {
            qps: self.qps * factor,
            tps: self.tps * factor,
        }
    }
}

/// `3t² − 2t³`, clamped to `[0, 1]`.
pub fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Everything the synthesizer reads from the rest of the system for one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInput {
    pub now: Duration,
    pub demand_phase: DemandPhase,
    /// Time since the current demand phase was entered.
    pub phase_elapsed: Duration,
    pub scaling_phase: ScalingPhase,
    pub cluster_config: ClusterConfig,
    /// Timestamp of the most recent handover marker event.
    pub last_handover: Option<Duration>,
}

/// Multiplicative jitter `1 + U(−a, a)` from a seedable source.
pub struct Jitter {
    amplitude: f64,
    seed: Option<u64>,
    rng: StdRng,
}

impl Jitter {
    pub fn new(amplitude: f64, seed: Option<u64>) -> Self {
        Self {
            amplitude,
            seed,
            rng: Self::rng_for(seed),
        }
    }

    fn rng_for(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Restart the sequence (same sequence again when seeded).
    pub fn reseed(&mut self) {
        self.rng = Self::rng_for(self.seed);
    }

    pub fn factor(&mut self) -> f64 {
        if self.amplitude <= 0.0 {
            return 1.0;
        }
        1.0 + self.rng.gen_range(-self.amplitude..=self.amplitude)
    }
}

/// Active handover dip, anchored to one marker.
#[derive(Debug, Clone, Copy)]
struct Dip {
    marker_at: Duration,
    /// Last emitted value before the marker.
    baseline: Throughput,
}

pub struct MetricsSynthesizer {
    cfg: MetricsConfig,
    /// Underlying trajectory, unaffected by the dip.
    level: Throughput,
    /// Last emitted value before jitter.
    last_clean: Throughput,
    dip: Option<Dip>,
    jitter: Jitter,
}

impl MetricsSynthesizer {
    pub fn new(cfg: MetricsConfig) -> Self {
        let steady = Throughput::new(cfg.steady_qps, cfg.steady_tps);
        let jitter = Jitter::new(cfg.jitter, cfg.seed);
        Self {
            cfg,
            level: steady,
            last_clean: steady,
            dip: None,
            jitter,
        }
    }

    /// Return to the steady level and restart the jitter sequence.
    pub fn reset(&mut self) {
        self.level = self.steady();
        self.last_clean = self.level;
        self.dip = None;
        self.jitter.reseed();
    }

    pub fn steady(&self) -> Throughput {
        Throughput::new(self.cfg.steady_qps, self.cfg.steady_tps)
    }

    pub fn peak(&self) -> Throughput {
        Throughput::new(self.cfg.peak_qps, self.cfg.peak_tps)
    }

    /// The current underlying (non-dip) level.
    pub fn level(&self) -> Throughput {
        self.level
    }

    /// Time-based target for a demand phase `elapsed` after its entry.
    pub fn target(&self, phase: DemandPhase, elapsed: Duration) -> Throughput {
        let t = elapsed.as_secs_f64() / self.cfg.ramp_window.as_secs_f64();
        match phase {
            DemandPhase::Steady => self.steady(),
            DemandPhase::Peak => self.peak(),
            DemandPhase::RampUp => self.steady().lerp(self.peak(), smoothstep(t)),
            DemandPhase::RampDown => self.peak().lerp(self.steady(), smoothstep(t)),
        }
    }

    /// Produce the sample for this tick.
    pub fn sample(&mut self, input: &TickInput) -> MetricSample {
        let target = self.target(input.demand_phase, input.phase_elapsed);
        let smoothed = self.level.lerp(target, self.cfg.smoothing);

        self.level = if input.demand_phase.is_ramp() {
            let blend = self.cfg.blend_window.as_secs_f64();
            let weight = if blend > 0.0 {
                input.phase_elapsed.as_secs_f64() / blend
            } else {
                1.0
            };
            if weight < 1.0 {
                smoothed.lerp(target, weight)
            } else {
                target
            }
        } else {
            smoothed
        };

        let value = self.apply_dip(input).unwrap_or(self.level);
        self.last_clean = value;

        MetricSample {
            qps: value.qps * self.jitter.factor(),
            tps: value.tps * self.jitter.factor(),
            timestamp_ms: as_millis(input.now),
            demand_phase: input.demand_phase,
            scaling_phase: input.scaling_phase,
            cluster_config: input.cluster_config,
        }
    }

    /// Dipped value while inside the handover window, `None` otherwise.
    fn apply_dip(&mut self, input: &TickInput) -> Option<Throughput> {
        if input.scaling_phase != ScalingPhase::SwitchingPrimary {
            return None;
        }
        let marker = input.last_handover?;
        let since = input.now.checked_sub(marker)?;
        if since >= self.cfg.dip_window() {
            return None;
        }

        let baseline = match self.dip {
            Some(dip) if dip.marker_at == marker => dip.baseline,
            _ => {
                let baseline = self.last_clean;
                debug!(
                    marker_ms = as_millis(marker),
                    qps = baseline.qps,
                    "handover dip anchored"
                );
                self.dip = Some(Dip {
                    marker_at: marker,
                    baseline,
                });
                baseline
            }
        };

        let floor = baseline.scale(self.cfg.dip_floor);
        if since < self.cfg.dip_duration {
            let frac = since.as_secs_f64() / self.cfg.dip_duration.as_secs_f64();
            Some(baseline.lerp(floor, frac))
        } else {
            let recovery = self.cfg.recovery_duration.as_secs_f64();
            let frac = if recovery > 0.0 {
                (since - self.cfg.dip_duration).as_secs_f64() / recovery
            } else {
                1.0
            };
            Some(floor.lerp(self.level, frac))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> MetricsConfig {
        MetricsConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    fn input(now_ms: u64, phase: DemandPhase, elapsed_ms: u64) -> TickInput {
        TickInput {
            now: Duration::from_millis(now_ms),
            demand_phase: phase,
            phase_elapsed: Duration::from_millis(elapsed_ms),
            scaling_phase: ScalingPhase::Idle,
            cluster_config: ClusterConfig::with_servers(2),
            last_handover: None,
        }
    }

    fn handover_input(now_ms: u64, marker_ms: u64, phase: DemandPhase) -> TickInput {
        TickInput {
            scaling_phase: ScalingPhase::SwitchingPrimary,
            last_handover: Some(Duration::from_millis(marker_ms)),
            ..input(now_ms, phase, 20_000)
        }
    }

    /// Drive a synthesizer through a full ramp-up into peak, 1 Hz ticks.
    fn ramp_into_peak(synth: &mut MetricsSynthesizer) -> u64 {
        let mut now = 0;
        for s in 1..=10 {
            now += 1000;
            synth.sample(&input(now, DemandPhase::RampUp, s * 1000));
        }
        now
    }

    #[test]
    fn smoothstep_shape() {
        assert_eq!(smoothstep(0.0), 0.0);
        assert_eq!(smoothstep(1.0), 1.0);
        assert_eq!(smoothstep(0.5), 0.5);
        assert_eq!(smoothstep(2.0), 1.0);
        assert_eq!(smoothstep(-1.0), 0.0);
        assert!((smoothstep(0.25) - 0.15625).abs() < 1e-12);
    }

    #[test]
    fn targets_by_phase() {
        let synth = MetricsSynthesizer::new(quiet_config());
        assert_eq!(synth.target(DemandPhase::Steady, Duration::ZERO), Throughput::new(5000.0, 4000.0));
        assert_eq!(synth.target(DemandPhase::Peak, Duration::ZERO), Throughput::new(28000.0, 22000.0));

        let mid = synth.target(DemandPhase::RampUp, Duration::from_secs(5));
        assert!((mid.qps - 16500.0).abs() < 1e-9);
        assert!((mid.tps - 13000.0).abs() < 1e-9);

        let done = synth.target(DemandPhase::RampUp, Duration::from_secs(30));
        assert_eq!(done, synth.peak());
        let down = synth.target(DemandPhase::RampDown, Duration::from_secs(10));
        assert_eq!(down, synth.steady());
    }

    #[test]
    fn steady_smooths_toward_target() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        synth.level = Throughput::new(10000.0, 8000.0);
        let sample = synth.sample(&input(1000, DemandPhase::Steady, 1000));
        // 10000 + 0.3 * (5000 - 10000)
        assert!((sample.qps - 8500.0).abs() < 1e-9);
        assert!((sample.tps - 6800.0).abs() < 1e-9);
    }

    #[test]
    fn ramp_entry_blends_without_jump() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        // Half-way through the blend window.
        let sample = synth.sample(&input(500, DemandPhase::RampUp, 500));
        let target = synth.target(DemandPhase::RampUp, Duration::from_millis(500));
        let smoothed = synth.steady().lerp(target, 0.3);
        let expected = smoothed.lerp(target, 0.5);
        assert!((sample.qps - expected.qps).abs() < 1e-9);
    }

    #[test]
    fn ramp_after_blend_follows_curve() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        let sample = synth.sample(&input(3000, DemandPhase::RampUp, 3000));
        let target = synth.target(DemandPhase::RampUp, Duration::from_secs(3));
        assert_eq!(sample.qps, target.qps);
    }

    #[test]
    fn ramp_down_ignores_scaling_phase() {
        let mut a = MetricsSynthesizer::new(quiet_config());
        let mut b = MetricsSynthesizer::new(quiet_config());
        let idle = input(4000, DemandPhase::RampDown, 4000);
        let retiring = TickInput {
            scaling_phase: ScalingPhase::RetiringZones,
            ..idle
        };
        assert_eq!(a.sample(&idle).qps, b.sample(&retiring).qps);
    }

    #[test]
    fn peak_envelope_holds_with_jitter() {
        let mut synth = MetricsSynthesizer::new(MetricsConfig {
            seed: Some(42),
            ..Default::default()
        });
        let mut now = ramp_into_peak(&mut synth);
        for s in 1..=20 {
            now += 1000;
            let sample = synth.sample(&input(now, DemandPhase::Peak, s * 1000));
            if s > 1 {
                let deviation = (sample.qps - 28000.0).abs() / 28000.0;
                assert!(deviation < 0.02, "qps {} deviates {deviation}", sample.qps);
            }
        }
    }

    #[test]
    fn handover_dip_stays_below_pre_marker_value() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        let mut now = ramp_into_peak(&mut synth);
        for _ in 0..10 {
            now += 1000;
            synth.sample(&input(now, DemandPhase::Peak, 20_000));
        }
        let before = synth.sample(&input(now + 1000, DemandPhase::Peak, 20_000)).qps;
        let marker = now + 1000;

        let mut last = 0.0;
        for offset in (100..2000).step_by(100) {
            let sample = synth.sample(&handover_input(marker + offset, marker, DemandPhase::Peak));
            assert!(sample.qps <= before, "offset {offset}: {} > {before}", sample.qps);
            last = sample.qps;
        }

        let trajectory = synth.level().qps;
        assert!((last - trajectory).abs() / trajectory < 0.01);
    }

    #[test]
    fn dip_bottoms_out_at_floor() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        let before = synth.sample(&input(1000, DemandPhase::Steady, 1000)).qps;
        // Exactly at the end of the dip, before recovery starts.
        let sample = synth.sample(&handover_input(1800, 1000, DemandPhase::Steady));
        assert!((sample.qps - before * 0.9).abs() < 1e-6);
    }

    #[test]
    fn dip_disabled_after_window() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        synth.sample(&input(1000, DemandPhase::Steady, 1000));
        let sample = synth.sample(&handover_input(3500, 1000, DemandPhase::Steady));
        assert_eq!(sample.qps, synth.level().qps);
    }

    #[test]
    fn dip_requires_switching_phase() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        synth.sample(&input(1000, DemandPhase::Steady, 1000));
        let retiring = TickInput {
            scaling_phase: ScalingPhase::RetiringZones,
            ..handover_input(1500, 1000, DemandPhase::Steady)
        };
        let sample = synth.sample(&retiring);
        assert_eq!(sample.qps, synth.level().qps);
    }

    #[test]
    fn seeded_jitter_is_reproducible_and_bounded() {
        let mut a = Jitter::new(0.005, Some(9));
        let mut b = Jitter::new(0.005, Some(9));
        for _ in 0..100 {
            let fa = a.factor();
            assert_eq!(fa, b.factor());
            assert!((0.995..=1.005).contains(&fa));
        }
        assert_eq!(Jitter::new(0.0, None).factor(), 1.0);
    }

    #[test]
    fn reset_restores_steady_level() {
        let mut synth = MetricsSynthesizer::new(quiet_config());
        ramp_into_peak(&mut synth);
        synth.reset();
        assert_eq!(synth.level(), synth.steady());
    }
}
