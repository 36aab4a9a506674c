use std::cell::RefCell;
use std::rc::Rc;

use downloads::{apply_download_event, DownloadEvent};
use host::HostEnvironment;
use memory::MetricSimulator;
use scheduler::{MonitoringLoop, TickError, TickReport};
use serde_json::Value;
use storage::{KeyValueStore, StatsPersistence, StorageChange, TrackedStats};
use tabs::{apply_tab_event, TabEvent};
use tracing::{info, warn};
use ui::Response;
use util::{Clock, SystemClock};

use crate::config::Config;
use crate::events::{HostEvent, InstallReason};
use crate::ipc;
use crate::query::QueryService;

/// Coordinator owning the stats stores.
///
/// Ingestion, monitoring, persistence and queries all borrow the stores from
/// here; none of them keeps state of its own.
pub struct Background {
    stats: TrackedStats,
    host: Rc<dyn HostEnvironment>,
    persistence: StatsPersistence,
    clock: Rc<dyn Clock>,
    simulator: Rc<RefCell<MetricSimulator>>,
    monitor: MonitoringLoop,
    config: Config,
}

impl Background {
    pub fn new(host: Rc<dyn HostEnvironment>, store: Rc<dyn KeyValueStore>, config: Config) -> Self {
        let simulator = match config.simulation_seed {
            Some(seed) => MetricSimulator::seeded(seed),
            None => MetricSimulator::new(),
        };
        Self::with_parts(host, store, Rc::new(SystemClock), simulator, config)
    }

    pub fn with_parts(
        host: Rc<dyn HostEnvironment>,
        store: Rc<dyn KeyValueStore>,
        clock: Rc<dyn Clock>,
        simulator: MetricSimulator,
        config: Config,
    ) -> Self {
        let persistence = StatsPersistence::new(store);
        let simulator = Rc::new(RefCell::new(simulator));
        let monitor = MonitoringLoop::new(
            Rc::clone(&host),
            persistence.clone(),
            Rc::clone(&clock),
            Rc::clone(&simulator),
            config.monitor(),
        );

        Self {
            stats: TrackedStats::new(),
            host,
            persistence,
            clock,
            simulator,
            monitor,
            config,
        }
    }

    pub fn stats(&self) -> &TrackedStats {
        &self.stats
    }

    pub fn host(&self) -> &dyn HostEnvironment {
        self.host.as_ref()
    }

    pub fn persistence(&self) -> &StatsPersistence {
        &self.persistence
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn monitor(&self) -> &MonitoringLoop {
        &self.monitor
    }

    pub fn query(&self) -> QueryService<'_> {
        QueryService::new(
            &self.stats,
            self.host.as_ref(),
            self.clock.as_ref(),
            &self.simulator,
            self.config.download_limit,
        )
    }

    pub fn apply_tab_event(&self, event: &TabEvent) {
        apply_tab_event(&mut self.stats.tabs.borrow_mut(), event, self.clock.now());
    }

    pub fn apply_download_event(&self, event: &DownloadEvent) {
        apply_download_event(&mut self.stats.downloads.borrow_mut(), event, self.clock.now());
    }

    /// Handles one host lifecycle notification. Never fails; storage errors
    /// during install or startup are logged.
    pub async fn handle_event(&self, event: &HostEvent) {
        match event {
            HostEvent::Tab(event) => self.apply_tab_event(event),
            HostEvent::Download(event) => self.apply_download_event(event),
            HostEvent::Installed { reason } => self.on_installed(*reason).await,
            HostEvent::Startup => self.on_startup().await,
        }
    }

    async fn on_installed(&self, reason: InstallReason) {
        info!(event = "installed", reason = ?reason);
        if reason != InstallReason::Install {
            return;
        }
        if let Err(err) = self
            .persistence
            .ensure_settings(&self.config.default_settings)
            .await
        {
            warn!(event = "settings_init_failed", error = %err);
        }
    }

    async fn on_startup(&self) {
        if let Err(err) = self.persistence.load_all(&self.stats).await {
            warn!(event = "stats_load_failed", error = %err);
        }
    }

    /// Reloads a store after another surface rewrote it.
    pub fn on_storage_change(&self, change: &StorageChange) {
        self.persistence.on_external_change(&self.stats, change);
    }

    pub async fn tick(&self) -> Result<TickReport, TickError> {
        self.monitor.tick(&self.stats).await
    }

    pub async fn flush(&self) -> bool {
        self.persistence.flush_all(&self.stats).await
    }

    /// Answers a raw message from the popup or another surface.
    pub async fn handle_message(&self, message: &Value) -> Response {
        ipc::dispatch(self, message).await
    }
}
