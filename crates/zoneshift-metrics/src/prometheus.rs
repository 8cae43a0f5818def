//! Prometheus text exposition format.
//!
//! Renders the latest throughput sample and the current zone set into the
//! Prometheus text format for scraping.

use std::fmt::Write;

use zoneshift_core::{MetricSample, ScalingPhase, Zone};

/// Render the latest sample and zone set into Prometheus text format.
///
/// The scaling phase is exposed as a state set: one series per phase with
/// value 1 for the active phase.
pub fn render_prometheus(latest: Option<&MetricSample>, zones: &[Zone], phase: ScalingPhase) -> String {
    let mut out = String::new();

    out.push_str("# HELP zoneshift_queries_per_second Synthesized queries per second.\n");
    out.push_str("# TYPE zoneshift_queries_per_second gauge\n");
    if let Some(s) = latest {
        let _ = writeln!(
            out,
            "zoneshift_queries_per_second{{demand_phase=\"{}\"}} {:.2}",
            s.demand_phase, s.qps
        );
    }

    out.push_str("# HELP zoneshift_transactions_per_second Synthesized transactions per second.\n");
    out.push_str("# TYPE zoneshift_transactions_per_second gauge\n");
    if let Some(s) = latest {
        let _ = writeln!(
            out,
            "zoneshift_transactions_per_second{{demand_phase=\"{}\"}} {:.2}",
            s.demand_phase, s.tps
        );
    }

    out.push_str("# HELP zoneshift_zone_observers Observer servers per zone.\n");
    out.push_str("# TYPE zoneshift_zone_observers gauge\n");
    for z in zones {
        let role = if z.is_primary() { "primary" } else { "secondary" };
        let _ = writeln!(
            out,
            "zoneshift_zone_observers{{zone=\"{}\",role=\"{}\"}} {}",
            z.name, role, z.observer_count
        );
    }

    out.push_str("# HELP zoneshift_scaling_phase Current scaling phase (1 = active).\n");
    out.push_str("# TYPE zoneshift_scaling_phase gauge\n");
    for p in ScalingPhase::ALL {
        let _ = writeln!(
            out,
            "zoneshift_scaling_phase{{phase=\"{}\"}} {}",
            p,
            u8::from(p == phase)
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoneshift_core::{ClusterConfig, DemandPhase, ZoneLifecycle, ZoneRole};

    fn test_sample() -> MetricSample {
        MetricSample {
            qps: 28012.3456,
            tps: 21990.5,
            timestamp_ms: 42_000,
            demand_phase: DemandPhase::Peak,
            scaling_phase: ScalingPhase::Idle,
            cluster_config: ClusterConfig::with_servers(4),
        }
    }

    fn test_zones() -> Vec<Zone> {
        vec![
            Zone::new(3, 4, ZoneRole::Primary, ZoneLifecycle::Stable),
            Zone::new(4, 4, ZoneRole::Primary, ZoneLifecycle::Stable),
        ]
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(None, &[], ScalingPhase::Idle);
        assert!(output.contains("# TYPE zoneshift_queries_per_second gauge"));
        assert!(output.contains("zoneshift_scaling_phase{phase=\"idle\"} 1"));
    }

    #[test]
    fn render_sample_and_zones() {
        let sample = test_sample();
        let output = render_prometheus(Some(&sample), &test_zones(), ScalingPhase::Idle);

        assert!(output.contains("zoneshift_queries_per_second{demand_phase=\"peak\"} 28012.35"));
        assert!(output.contains("zoneshift_transactions_per_second{demand_phase=\"peak\"} 21990.50"));
        assert!(output.contains("zoneshift_zone_observers{zone=\"zone-3\",role=\"primary\"} 4"));
        assert!(output.contains("zoneshift_zone_observers{zone=\"zone-4\",role=\"primary\"} 4"));
    }

    #[test]
    fn exactly_one_phase_is_active() {
        let output = render_prometheus(None, &[], ScalingPhase::SwitchingPrimary);
        let active: Vec<&str> = output
            .lines()
            .filter(|l| l.starts_with("zoneshift_scaling_phase") && l.ends_with(" 1"))
            .collect();
        assert_eq!(active, vec!["zoneshift_scaling_phase{phase=\"switching_primary\"} 1"]);
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let sample = test_sample();
        let output = render_prometheus(Some(&sample), &test_zones(), ScalingPhase::Idle);
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            assert!(
                line.contains('{') && line.contains('}'),
                "line should have labels: {line}"
            );
        }
    }
}
