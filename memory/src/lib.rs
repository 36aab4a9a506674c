use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub mod system;

pub use system::{MemInfoSource, SystemMemory, SystemMemorySource};

/// Lower bound for simulated per-tab memory, in MB.
pub const MIN_TAB_MEMORY_MB: f64 = 10.0;
/// Largest step applied to a tab's memory estimate per tick, in MB.
pub const MEMORY_DRIFT_MB: f64 = 10.0;
/// Largest step applied to a tab's CPU estimate per tick, in percent.
pub const CPU_DRIFT_PERCENT: f64 = 5.0;
/// Bounds for the synthetic system CPU estimate, in percent.
pub const SYSTEM_CPU_MIN: f64 = 5.0;
pub const SYSTEM_CPU_MAX: f64 = 90.0;

/// Where a reported figure came from.
///
/// `Measured` values were reported by the host; `Estimated` values are
/// simulated or placeholders and carry no accuracy guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "lowercase")]
pub enum MetricSource<T> {
    Measured(T),
    Estimated(T),
}

impl<T: Copy> MetricSource<T> {
    pub fn value(&self) -> T {
        match self {
            MetricSource::Measured(value) | MetricSource::Estimated(value) => *value,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, MetricSource::Measured(_))
    }
}

/// Random-walk simulation for tab metrics and placeholder figures.
///
/// Seed it explicitly for reproducible runs.
#[derive(Debug, Clone)]
pub struct MetricSimulator {
    rng: StdRng,
}

impl MetricSimulator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Drifts a memory estimate by a symmetric step, floored at
    /// [`MIN_TAB_MEMORY_MB`].
    pub fn perturb_memory(&mut self, current: f64) -> f64 {
        let step = self.rng.random_range(-MEMORY_DRIFT_MB..=MEMORY_DRIFT_MB);
        (current + step).max(MIN_TAB_MEMORY_MB)
    }

    /// Drifts a CPU estimate by a symmetric step, clamped to `[0, 100]`.
    pub fn perturb_cpu(&mut self, current: f64) -> f64 {
        let step = self.rng.random_range(-CPU_DRIFT_PERCENT..=CPU_DRIFT_PERCENT);
        (current + step).clamp(0.0, 100.0)
    }

    pub fn placeholder_tab_memory(&mut self) -> f64 {
        self.rng.random_range(50.0..250.0)
    }

    pub fn placeholder_tab_cpu(&mut self) -> f64 {
        self.rng.random_range(0.0..15.0)
    }

    /// Synthetic system CPU load from the amount of live work.
    pub fn system_cpu(&mut self, tab_count: usize, active_downloads: usize) -> f64 {
        let noise = self.rng.random_range(0.0..10.0);
        estimate_system_cpu(tab_count, active_downloads, noise)
    }

    /// CPU figure used when the host cannot list tabs or downloads.
    pub fn fallback_system_cpu(&mut self) -> f64 {
        self.rng.random_range(10.0..40.0)
    }

    /// Memory utilization percentage used when the host reports nothing.
    pub fn fallback_memory_percent(&mut self) -> f64 {
        self.rng.random_range(30.0..70.0)
    }
}

impl Default for MetricSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Combines workload counts and noise into a CPU percentage within
/// `[SYSTEM_CPU_MIN, SYSTEM_CPU_MAX]`.
pub fn estimate_system_cpu(tab_count: usize, active_downloads: usize, noise: f64) -> f64 {
    let load = tab_count as f64 * 2.0 + active_downloads as f64 * 5.0 + noise;
    if load.is_nan() {
        return SYSTEM_CPU_MIN;
    }
    load.clamp(SYSTEM_CPU_MIN, SYSTEM_CPU_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_drift_respects_floor() {
        let mut sim = MetricSimulator::seeded(7);
        let mut memory = 12.0;
        for _ in 0..500 {
            let next = sim.perturb_memory(memory);
            assert!(next >= MIN_TAB_MEMORY_MB);
            assert!((next - memory).abs() <= MEMORY_DRIFT_MB || next == MIN_TAB_MEMORY_MB);
            memory = next;
        }
    }

    #[test]
    fn cpu_drift_stays_in_percent_range() {
        let mut sim = MetricSimulator::seeded(11);
        for start in [0.0, 2.0, 50.0, 98.0, 100.0] {
            let mut cpu = start;
            for _ in 0..200 {
                cpu = sim.perturb_cpu(cpu);
                assert!((0.0..=100.0).contains(&cpu));
            }
        }
    }

    #[test]
    fn system_cpu_is_bounded_for_any_load() {
        let mut sim = MetricSimulator::seeded(3);
        for tabs in [0usize, 1, 10, 40, 1000, usize::MAX] {
            for downloads in [0usize, 1, 5, 100, usize::MAX] {
                let cpu = sim.system_cpu(tabs, downloads);
                assert!((SYSTEM_CPU_MIN..=SYSTEM_CPU_MAX).contains(&cpu), "{cpu}");
            }
        }
        assert_eq!(estimate_system_cpu(0, 0, 0.0), SYSTEM_CPU_MIN);
        assert_eq!(estimate_system_cpu(10, 2, 0.0), 30.0);
    }

    #[test]
    fn metric_source_serializes_with_origin() {
        let value = serde_json::to_value(MetricSource::Measured(42.5)).unwrap();
        assert_eq!(value["source"], "measured");
        assert_eq!(value["value"], 42.5);
        assert!(!MetricSource::Estimated(1.0).is_measured());
    }
}
