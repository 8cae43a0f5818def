//! zoneshift-metrics — synthetic throughput for the scaling loop.
//!
//! # Architecture
//!
//! ```text
//! MetricsSynthesizer
//!   ├── target()  ← demand phase + elapsed (smoothstep ramps)
//!   ├── sample()  → one MetricSample per tick (smoothing, handover dip, jitter)
//!   └── Jitter    ← seeded StdRng for deterministic runs
//!
//! MetricHistory
//!   ├── push() / recent()  ← ring buffer (100 retained, 60 displayed)
//!   └── is_stable()        → 5-sample qps spread below 500
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod history;
pub mod prometheus;
pub mod synthesizer;

pub use history::{is_stable, qps_spread, MetricHistory};
pub use prometheus::render_prometheus;
pub use synthesizer::{smoothstep, Jitter, MetricsSynthesizer, Throughput, TickInput};
