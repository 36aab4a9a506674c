use std::cell::RefCell;

use chrono::{DateTime, Utc};
use downloads::{DownloadInfo, DownloadState};
use host::{HostEnvironment, HostError, ProcessMetrics};
use memory::{MetricSimulator, MetricSource};
use storage::TrackedStats;
use tabs::{TabInfo, TabRecord};
use ui::{DownloadStat, SystemStats, TabStat};
use util::{format_bytes, format_eta, Clock};

const NOT_AVAILABLE: &str = "N/A";
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Point-in-time answers built from a fresh host listing plus the tracked
/// stats.
pub struct QueryService<'a> {
    stats: &'a TrackedStats,
    host: &'a dyn HostEnvironment,
    clock: &'a dyn Clock,
    simulator: &'a RefCell<MetricSimulator>,
    download_limit: usize,
}

impl<'a> QueryService<'a> {
    pub fn new(
        stats: &'a TrackedStats,
        host: &'a dyn HostEnvironment,
        clock: &'a dyn Clock,
        simulator: &'a RefCell<MetricSimulator>,
        download_limit: usize,
    ) -> Self {
        Self {
            stats,
            host,
            clock,
            simulator,
            download_limit,
        }
    }

    /// Every live tab with its best available memory and CPU figures.
    ///
    /// Process measurements from the host win, then tracked estimates, then
    /// random placeholders.
    pub async fn tab_stats(&self) -> Result<Vec<TabStat>, HostError> {
        let live = self.host.list_tabs().await?;
        let mut result = Vec::with_capacity(live.len());

        for tab in live {
            // Process info is optional; failures fall back to estimates.
            let measured = self
                .host
                .tab_process_metrics(tab.id)
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            let tracked = self.stats.tabs.borrow().get(tab.id).cloned();
            result.push(self.merge_tab(tab, tracked, measured));
        }

        Ok(result)
    }

    fn merge_tab(&self, tab: TabInfo, tracked: Option<TabRecord>, measured: ProcessMetrics) -> TabStat {
        let mut simulator = self.simulator.borrow_mut();

        let memory_usage = match (measured.private_memory_bytes, &tracked) {
            (Some(bytes), _) => MetricSource::Measured(bytes as f64 / BYTES_PER_MB),
            (None, Some(record)) if record.memory_usage > 0.0 => {
                MetricSource::Estimated(record.memory_usage)
            }
            _ => MetricSource::Estimated(simulator.placeholder_tab_memory()),
        };
        let cpu_usage = match (measured.cpu_percent, &tracked) {
            (Some(percent), _) => MetricSource::Measured(percent.clamp(0.0, 100.0)),
            (None, Some(record)) if record.last_seen.is_some() || record.cpu_usage > 0.0 => {
                MetricSource::Estimated(record.cpu_usage)
            }
            _ => MetricSource::Estimated(simulator.placeholder_tab_cpu()),
        };

        TabStat {
            id: tab.id,
            window_id: tab.window_id,
            title: tab.title,
            url: tab.url,
            active: tab.active,
            status: tab.status,
            pinned: tab.pinned,
            audible: tab.audible,
            fav_icon_url: tab.fav_icon_url,
            created_at: tracked.as_ref().map(|record| record.created_at),
            last_updated: tracked.as_ref().and_then(|record| record.last_updated),
            last_seen: tracked.as_ref().and_then(|record| record.last_seen),
            memory_usage,
            cpu_usage,
        }
    }

    /// The most recent downloads with progress, speed and remaining time,
    /// newest first.
    pub async fn download_stats(&self) -> Result<Vec<DownloadStat>, HostError> {
        let listed = self.host.list_downloads(self.download_limit).await?;
        let now = self.clock.now();

        let downloads = self.stats.downloads.borrow();
        let mut result: Vec<DownloadStat> = listed
            .into_iter()
            .take(self.download_limit)
            .map(|info| {
                let tracked = downloads.get(info.id);
                let elapsed = tracked
                    .and_then(|record| record.last_updated)
                    .map(|at| seconds_between(at, now));
                build_download_stat(
                    info,
                    tracked.map(|record| record.created_at),
                    tracked.and_then(|record| record.last_updated),
                    elapsed,
                )
            })
            .collect();

        result.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(result)
    }

    /// Coarse CPU and memory figures. Never fails: host errors fall back to
    /// random estimates.
    pub async fn system_stats(&self) -> SystemStats {
        let tabs = self.host.list_tabs().await;
        let downloads = self.host.list_downloads(self.download_limit).await;
        let memory = self.host.system_memory().await.ok();
        let cpu_info = self.host.cpu_info().await.ok();

        let tab_count = match &tabs {
            Ok(tabs) => tabs.len(),
            Err(_) => self.stats.tabs.borrow().len(),
        };
        let active_downloads = match &downloads {
            Ok(downloads) => downloads
                .iter()
                .filter(|download| download.state == DownloadState::InProgress)
                .count(),
            Err(_) => 0,
        };

        let mut simulator = self.simulator.borrow_mut();
        let cpu_usage = if tabs.is_ok() && downloads.is_ok() {
            simulator.system_cpu(tab_count, active_downloads)
        } else {
            simulator.fallback_system_cpu()
        };
        let memory_usage = match memory.and_then(|memory| memory.used_percent()) {
            Some(percent) => MetricSource::Measured(percent),
            None => MetricSource::Estimated(simulator.fallback_memory_percent()),
        };

        SystemStats {
            cpu_usage: MetricSource::Estimated(cpu_usage),
            memory_usage,
            memory_capacity: memory.map(|memory| memory.capacity_bytes),
            memory_available: memory.map(|memory| memory.available_bytes),
            tab_count,
            active_downloads,
            processors: cpu_info.as_ref().map(|info| info.num_of_processors),
            cpu_model: cpu_info
                .map(|info| info.model_name)
                .filter(|model| !model.is_empty()),
            timestamp: self.clock.now(),
        }
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

fn build_download_stat(
    info: DownloadInfo,
    created_at: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
    elapsed_secs: Option<f64>,
) -> DownloadStat {
    let speed = transfer_rate(info.bytes_received, elapsed_secs);
    let time_remaining = time_remaining(info.state, info.bytes_received, info.total_bytes, speed);

    DownloadStat {
        id: info.id,
        progress: progress(info.bytes_received, info.total_bytes),
        speed: speed_label(speed),
        bytes_per_second: speed,
        time_remaining,
        filename: info.filename,
        url: info.url,
        state: info.state,
        paused: info.paused,
        bytes_received: info.bytes_received,
        total_bytes: info.total_bytes,
        start_time: info.start_time,
        end_time: info.end_time,
        mime: info.mime,
        error: info.error,
        created_at,
        last_updated,
    }
}

/// Percent of `total` received; 0 when the total is unknown.
pub fn progress(received: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (received as f64 / total as f64 * 100.0).min(100.0)
}

/// Bytes per second since the last tracked update. `None` without a prior
/// update or when less than a second has passed.
pub fn transfer_rate(received: u64, elapsed_secs: Option<f64>) -> Option<f64> {
    let elapsed = elapsed_secs?;
    if elapsed < 1.0 {
        return None;
    }
    Some(received as f64 / elapsed)
}

pub fn speed_label(speed: Option<f64>) -> String {
    match speed {
        Some(speed) => format!("{}/s", format_bytes(speed.round() as u64)),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Remaining transfer time for in-progress downloads with a known total.
pub fn time_remaining(state: DownloadState, received: u64, total: u64, speed: Option<f64>) -> String {
    if state != DownloadState::InProgress || total == 0 {
        return NOT_AVAILABLE.to_string();
    }
    match speed {
        Some(speed) if speed > 0.0 => {
            let remaining = total.saturating_sub(received) as f64;
            format_eta(remaining / speed)
        }
        _ => NOT_AVAILABLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use downloads::{DownloadId, DownloadRecord};
    use host::{CpuInfo, InMemoryHost};
    use memory::{SystemMemory, SystemMemorySource, SYSTEM_CPU_MAX, SYSTEM_CPU_MIN};
    use tabs::TabId;
    use util::ManualClock;

    fn start() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct FixedMemory(SystemMemory);

    impl SystemMemorySource for FixedMemory {
        fn sample(&mut self) -> Option<SystemMemory> {
            Some(self.0)
        }
    }

    #[test]
    fn progress_is_exact_and_zero_without_total() {
        assert_eq!(progress(50, 200), 25.0);
        assert_eq!(progress(50, 0), 0.0);
        assert_eq!(progress(300, 200), 100.0);
    }

    #[test]
    fn sub_second_elapsed_has_no_speed_or_eta() {
        let speed = transfer_rate(4096, Some(0.5));
        assert_eq!(speed, None);
        assert_eq!(speed_label(speed), "N/A");
        assert_eq!(time_remaining(DownloadState::InProgress, 4096, 8192, speed), "N/A");
        assert_eq!(transfer_rate(4096, None), None);
    }

    #[test]
    fn eta_in_minutes_between_one_minute_and_one_hour() {
        let speed = transfer_rate(1000, Some(10.0));
        assert_eq!(speed, Some(100.0));
        assert_eq!(speed_label(speed), "100 B/s");
        // 12_000 bytes left at 100 B/s is 120 seconds.
        assert_eq!(time_remaining(DownloadState::InProgress, 1000, 13_000, speed), "2m");
        assert_eq!(time_remaining(DownloadState::Complete, 1000, 13_000, speed), "N/A");
        assert_eq!(time_remaining(DownloadState::InProgress, 1000, 0, speed), "N/A");
    }

    #[tokio::test]
    async fn download_stats_merge_and_sort_newest_first() {
        let host = InMemoryHost::new();
        let clock = ManualClock::new(start());
        let stats = TrackedStats::new();
        let simulator = RefCell::new(MetricSimulator::seeded(9));

        let mut older = DownloadInfo::new(DownloadId::new(1), "older.iso", start() - Duration::hours(2));
        older.bytes_received = 50;
        older.total_bytes = 200;
        host.insert_download(older.clone());
        let newer = DownloadInfo::new(DownloadId::new(2), "newer.iso", start() - Duration::minutes(5));
        host.insert_download(newer);

        let mut record = DownloadRecord::from_info(&older, start() - Duration::hours(2));
        record.last_updated = Some(start() - Duration::seconds(5));
        stats.downloads.borrow_mut().set(older.id, record);

        let query = QueryService::new(&stats, &host, &clock, &simulator, 100);
        let result = query.download_stats().await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, DownloadId::new(2));
        assert_eq!(result[0].speed, "N/A");
        assert_eq!(result[1].progress, 25.0);
        assert_eq!(result[1].bytes_per_second, Some(10.0));
        assert_eq!(result[1].time_remaining, "15s");
        assert_eq!(result[1].last_updated, Some(start() - Duration::seconds(5)));
    }

    #[tokio::test]
    async fn tab_stats_prefer_measurements_then_estimates() {
        let host = InMemoryHost::new();
        let clock = ManualClock::new(start());
        let stats = TrackedStats::new();
        let simulator = RefCell::new(MetricSimulator::seeded(9));

        for id in 1..=3 {
            host.insert_tab(TabInfo::new(TabId::new(id), format!("Tab {id}"), "https://t.test"));
        }
        host.set_process_metrics(
            TabId::new(1),
            ProcessMetrics {
                private_memory_bytes: Some(64 * 1024 * 1024),
                cpu_percent: Some(12.5),
            },
        );
        let mut tracked = TabRecord::new(TabId::new(2), "stale title", "", start());
        tracked.memory_usage = 80.0;
        tracked.cpu_usage = 4.0;
        tracked.last_seen = Some(start());
        stats.tabs.borrow_mut().set(TabId::new(2), tracked);

        let query = QueryService::new(&stats, &host, &clock, &simulator, 100);
        let result = query.tab_stats().await.unwrap();
        let by_id = |id: u64| result.iter().find(|tab| tab.id == TabId::new(id)).unwrap();

        assert_eq!(by_id(1).memory_usage, MetricSource::Measured(64.0));
        assert_eq!(by_id(1).cpu_usage, MetricSource::Measured(12.5));
        assert_eq!(by_id(2).memory_usage, MetricSource::Estimated(80.0));
        assert_eq!(by_id(2).cpu_usage, MetricSource::Estimated(4.0));
        assert_eq!(by_id(2).title, "Tab 2");
        assert_eq!(by_id(2).created_at, Some(start()));
        assert!(!by_id(3).memory_usage.is_measured());
        assert_eq!(by_id(3).created_at, None);
    }

    #[tokio::test]
    async fn system_stats_use_host_memory_when_available() {
        let host = InMemoryHost::new().with_memory_source(FixedMemory(SystemMemory {
            capacity_bytes: 1000,
            available_bytes: 250,
        }));
        host.set_cpu_info(Some(CpuInfo {
            num_of_processors: 8,
            model_name: "Test CPU".into(),
            arch_name: "x86_64".into(),
        }));
        for id in 1..=4 {
            host.insert_tab(TabInfo::new(TabId::new(id), "", ""));
        }
        let clock = ManualClock::new(start());
        let stats = TrackedStats::new();
        let simulator = RefCell::new(MetricSimulator::seeded(9));

        let query = QueryService::new(&stats, &host, &clock, &simulator, 100);
        let system = query.system_stats().await;

        assert_eq!(system.memory_usage, MetricSource::Measured(75.0));
        assert_eq!(system.tab_count, 4);
        assert_eq!(system.processors, Some(8));
        assert_eq!(system.cpu_model.as_deref(), Some("Test CPU"));
        let cpu = system.cpu_usage.value();
        assert!((SYSTEM_CPU_MIN..=SYSTEM_CPU_MAX).contains(&cpu));
    }

    struct DownHost;

    #[async_trait(?Send)]
    impl HostEnvironment for DownHost {
        async fn list_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
            Err(HostError::Unavailable("tabs".into()))
        }

        async fn list_downloads(&self, _limit: usize) -> Result<Vec<DownloadInfo>, HostError> {
            Err(HostError::Unavailable("downloads".into()))
        }

        async fn tab_process_metrics(&self, _tab: TabId) -> Result<Option<ProcessMetrics>, HostError> {
            Err(HostError::Unavailable("processes".into()))
        }

        async fn system_memory(&self) -> Result<SystemMemory, HostError> {
            Err(HostError::Unavailable("memory".into()))
        }

        async fn cpu_info(&self) -> Result<CpuInfo, HostError> {
            Err(HostError::Unavailable("cpu".into()))
        }

        async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
            Err(HostError::TabNotFound(tab))
        }

        async fn focus_tab(&self, tab: TabId) -> Result<(), HostError> {
            Err(HostError::TabNotFound(tab))
        }

        async fn pause_download(&self, id: DownloadId) -> Result<(), HostError> {
            Err(HostError::DownloadNotFound(id))
        }

        async fn resume_download(&self, id: DownloadId) -> Result<(), HostError> {
            Err(HostError::DownloadNotFound(id))
        }

        async fn cancel_download(&self, id: DownloadId) -> Result<(), HostError> {
            Err(HostError::DownloadNotFound(id))
        }
    }

    #[tokio::test]
    async fn system_stats_degrade_to_estimates() {
        let clock = ManualClock::new(start());
        let stats = TrackedStats::new();
        stats
            .tabs
            .borrow_mut()
            .set(TabId::new(1), TabRecord::new(TabId::new(1), "", "", start()));
        let simulator = RefCell::new(MetricSimulator::seeded(9));

        let query = QueryService::new(&stats, &DownHost, &clock, &simulator, 100);
        let system = query.system_stats().await;

        assert!(!system.memory_usage.is_measured());
        assert!((30.0..70.0).contains(&system.memory_usage.value()));
        assert!((10.0..40.0).contains(&system.cpu_usage.value()));
        assert_eq!(system.tab_count, 1);
        assert_eq!(system.memory_capacity, None);
        assert!(query.tab_stats().await.is_err());
    }
}
