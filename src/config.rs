use std::time::Duration;

use scheduler::MonitorConfig;
use serde::Deserialize;
use storage::Settings;

/// Largest accepted staleness window, one hundred years.
pub const MAX_STALENESS_HOURS: i64 = 100 * 365 * 24;

/// Runtime configuration for the background service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Period of the monitoring loop.
    pub monitor_interval_ms: u64,
    /// Inactivity window after which tracked records are evicted.
    pub staleness_hours: i64,
    /// Upper bound on downloads returned by a download stats query.
    pub download_limit: usize,
    /// Settings written on first install.
    pub default_settings: Settings,
    /// Seed for the metric simulation; random when absent.
    pub simulation_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 10_000,
            staleness_hours: 24,
            download_limit: 100,
            default_settings: Settings::default(),
            simulation_seed: None,
        }
    }
}

impl Config {
    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(self.monitor_interval_ms.max(1)),
            staleness: chrono::Duration::try_hours(self.staleness_hours.clamp(0, MAX_STALENESS_HOURS))
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}
