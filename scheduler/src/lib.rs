use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use host::{HostEnvironment, HostError};
use memory::MetricSimulator;
use storage::{StatsPersistence, TrackedStats};
use tabs::TabRecord;
use thiserror::Error;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use util::Clock;

/// Default period between monitoring ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);
/// Default inactivity window after which a record is evicted.
pub const DEFAULT_STALENESS_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("failed to list live tabs: {0}")]
    Host(#[from] HostError),
}

/// Cadence and retention for the monitoring loop.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub staleness: chrono::Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_TICK_INTERVAL,
            staleness: chrono::Duration::hours(DEFAULT_STALENESS_HOURS),
        }
    }
}

/// Summary of a single monitoring tick.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct TickReport {
    pub observed_tabs: usize,
    pub created_tabs: usize,
    pub evicted_tabs: usize,
    pub evicted_downloads: usize,
    pub flushed: bool,
}

/// Periodic re-sampling of live tabs.
///
/// Each tick refreshes observation timestamps, drifts the simulated
/// metrics, evicts stale records and flushes both stores. Metrics produced
/// here are simulations, not measurements.
pub struct MonitoringLoop {
    host: Rc<dyn HostEnvironment>,
    persistence: StatsPersistence,
    clock: Rc<dyn Clock>,
    simulator: Rc<RefCell<MetricSimulator>>,
    config: MonitorConfig,
}

impl MonitoringLoop {
    pub fn new(
        host: Rc<dyn HostEnvironment>,
        persistence: StatsPersistence,
        clock: Rc<dyn Clock>,
        simulator: Rc<RefCell<MetricSimulator>>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            host,
            persistence,
            clock,
            simulator,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Runs one tick.
    ///
    /// A failed tab listing still evicts and flushes before the error is
    /// returned.
    pub async fn tick(&self, stats: &TrackedStats) -> Result<TickReport, TickError> {
        let listing = self.host.list_tabs().await;
        let now = self.clock.now();
        let mut report = TickReport::default();

        if let Ok(live) = &listing {
            let mut tabs = stats.tabs.borrow_mut();
            let mut simulator = self.simulator.borrow_mut();
            for tab in live {
                report.observed_tabs += 1;
                match tabs.get_mut(tab.id) {
                    Some(record) => {
                        record.last_seen = Some(now);
                        record.memory_usage = simulator.perturb_memory(record.memory_usage);
                        record.cpu_usage = simulator.perturb_cpu(record.cpu_usage);
                    }
                    None => {
                        let mut record = TabRecord::new(tab.id, &tab.title, &tab.url, now);
                        record.last_seen = Some(now);
                        record.memory_usage = simulator.perturb_memory(record.memory_usage);
                        record.cpu_usage = simulator.perturb_cpu(record.cpu_usage);
                        tabs.set(tab.id, record);
                        report.created_tabs += 1;
                    }
                }
            }
        }

        let (evicted_tabs, evicted_downloads) = evict_stale(stats, now, self.config.staleness);
        report.evicted_tabs = evicted_tabs;
        report.evicted_downloads = evicted_downloads;
        report.flushed = self.persistence.flush_all(stats).await;

        listing?;
        Ok(report)
    }

    /// Ticks forever on the configured interval. Tick failures are logged
    /// and never stop the schedule.
    pub async fn run(&self, stats: &TrackedStats) {
        let period = self.config.interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(event = "monitor_started", interval_ms = period.as_millis() as u64);

        loop {
            ticker.tick().await;
            match self.tick(stats).await {
                Ok(report) => debug!(
                    event = "monitor_tick",
                    observed = report.observed_tabs,
                    created = report.created_tabs,
                    evicted_tabs = report.evicted_tabs,
                    evicted_downloads = report.evicted_downloads,
                    flushed = report.flushed
                ),
                Err(err) => warn!(event = "monitor_tick_failed", error = %err),
            }
        }
    }
}

/// Drops tab and download records last observed more than `staleness`
/// before `now`. Returns the number of tabs and downloads evicted.
pub fn evict_stale(
    stats: &TrackedStats,
    now: DateTime<Utc>,
    staleness: chrono::Duration,
) -> (usize, usize) {
    let Some(cutoff) = now.checked_sub_signed(staleness) else {
        return (0, 0);
    };
    let tabs = stats
        .tabs
        .borrow_mut()
        .retain(|_, record| record.last_observed() >= cutoff);
    let downloads = stats
        .downloads
        .borrow_mut()
        .retain(|_, record| record.last_observed() >= cutoff);

    if tabs > 0 || downloads > 0 {
        info!(event = "stale_evicted", tabs, downloads);
    }
    (tabs, downloads)
}
