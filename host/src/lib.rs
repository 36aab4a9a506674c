use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use downloads::{DownloadEvent, DownloadId, DownloadInfo, DownloadState};
use memory::{SystemMemory, SystemMemorySource};
use serde::{Deserialize, Serialize};
use tabs::{TabEvent, TabId, TabInfo};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error("host capability unavailable: {0}")]
    Unavailable(String),
    #[error("no tab with id {0}")]
    TabNotFound(TabId),
    #[error("no download with id {0}")]
    DownloadNotFound(DownloadId),
    #[error("download {id} cannot {action} while {state}")]
    InvalidDownloadState {
        id: DownloadId,
        action: &'static str,
        state: &'static str,
    },
}

/// Per-tab process figures, when the host exposes process information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetrics {
    #[serde(default)]
    pub private_memory_bytes: Option<u64>,
    #[serde(default)]
    pub cpu_percent: Option<f64>,
}

/// Processor description reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    pub num_of_processors: usize,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub arch_name: String,
}

/// Capabilities the surrounding browser provides.
///
/// Every call is a suspension point; implementations run on a single
/// thread and need not be `Send`.
#[async_trait(?Send)]
pub trait HostEnvironment {
    /// Lists all currently open tabs.
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, HostError>;

    /// Lists up to `limit` downloads, most recently started first.
    async fn list_downloads(&self, limit: usize) -> Result<Vec<DownloadInfo>, HostError>;

    /// Process figures for the renderer backing `tab`, if known.
    async fn tab_process_metrics(&self, tab: TabId) -> Result<Option<ProcessMetrics>, HostError>;

    async fn system_memory(&self) -> Result<SystemMemory, HostError>;

    async fn cpu_info(&self) -> Result<CpuInfo, HostError>;

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError>;

    /// Activates `tab` and brings its window to the front.
    async fn focus_tab(&self, tab: TabId) -> Result<(), HostError>;

    async fn pause_download(&self, id: DownloadId) -> Result<(), HostError>;

    async fn resume_download(&self, id: DownloadId) -> Result<(), HostError>;

    async fn cancel_download(&self, id: DownloadId) -> Result<(), HostError>;
}

/// Host that mirrors lifecycle events in memory.
///
/// Used by the daemon, where the real browser forwards its events, and by
/// tests.
#[derive(Default)]
pub struct InMemoryHost {
    tabs: RefCell<Vec<TabInfo>>,
    downloads: RefCell<HashMap<DownloadId, DownloadInfo>>,
    processes: RefCell<HashMap<TabId, ProcessMetrics>>,
    memory: RefCell<Option<Box<dyn SystemMemorySource>>>,
    cpu: RefCell<Option<CpuInfo>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_source<S: SystemMemorySource + 'static>(self, source: S) -> Self {
        *self.memory.borrow_mut() = Some(Box::new(source));
        self
    }

    pub fn set_cpu_info(&self, info: Option<CpuInfo>) {
        *self.cpu.borrow_mut() = info;
    }

    pub fn set_process_metrics(&self, tab: TabId, metrics: ProcessMetrics) {
        self.processes.borrow_mut().insert(tab, metrics);
    }

    pub fn insert_tab(&self, tab: TabInfo) {
        let mut tabs = self.tabs.borrow_mut();
        match tabs.iter_mut().find(|existing| existing.id == tab.id) {
            Some(existing) => *existing = tab,
            None => tabs.push(tab),
        }
    }

    pub fn insert_download(&self, download: DownloadInfo) {
        self.downloads.borrow_mut().insert(download.id, download);
    }

    pub fn tab(&self, id: TabId) -> Option<TabInfo> {
        self.tabs.borrow().iter().find(|tab| tab.id == id).cloned()
    }

    pub fn download(&self, id: DownloadId) -> Option<DownloadInfo> {
        self.downloads.borrow().get(&id).cloned()
    }

    /// Mirrors a tab lifecycle event into the host view.
    pub fn apply_tab_event(&self, event: &TabEvent) {
        match event {
            TabEvent::Created { tab } => self.insert_tab(tab.clone()),
            TabEvent::Removed { id } => {
                self.tabs.borrow_mut().retain(|tab| tab.id != *id);
                self.processes.borrow_mut().remove(id);
            }
            TabEvent::Updated { id, change, tab } => {
                if let Some(tab) = tab {
                    self.insert_tab(tab.clone());
                    return;
                }
                let mut tabs = self.tabs.borrow_mut();
                let Some(existing) = tabs.iter_mut().find(|tab| tab.id == *id) else {
                    return;
                };
                if let Some(status) = change.status {
                    existing.status = Some(status);
                }
                if let Some(title) = &change.title {
                    existing.title = title.clone();
                }
                if let Some(url) = &change.url {
                    existing.url = url.clone();
                }
            }
        }
    }

    /// Mirrors a download lifecycle event into the host view.
    pub fn apply_download_event(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Created { download } => self.insert_download(download.clone()),
            DownloadEvent::Changed { id, delta } => {
                let mut downloads = self.downloads.borrow_mut();
                let Some(download) = downloads.get_mut(id) else {
                    return;
                };
                if let Some(state) = delta.state {
                    download.state = state;
                }
                if let Some(bytes_received) = delta.bytes_received {
                    download.bytes_received = bytes_received;
                }
                if let Some(total_bytes) = delta.total_bytes {
                    download.total_bytes = total_bytes;
                }
                if let Some(filename) = &delta.filename {
                    download.filename = filename.clone();
                }
                if let Some(paused) = delta.paused {
                    download.paused = paused;
                }
                if delta.error.is_some() {
                    download.error = delta.error.clone();
                }
            }
        }
    }

    fn with_download<F>(&self, id: DownloadId, f: F) -> Result<(), HostError>
    where
        F: FnOnce(&mut DownloadInfo) -> Result<(), HostError>,
    {
        let mut downloads = self.downloads.borrow_mut();
        let download = downloads
            .get_mut(&id)
            .ok_or(HostError::DownloadNotFound(id))?;
        f(download)
    }
}

#[async_trait(?Send)]
impl HostEnvironment for InMemoryHost {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        Ok(self.tabs.borrow().clone())
    }

    async fn list_downloads(&self, limit: usize) -> Result<Vec<DownloadInfo>, HostError> {
        let mut downloads: Vec<DownloadInfo> = self.downloads.borrow().values().cloned().collect();
        downloads.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        downloads.truncate(limit);
        Ok(downloads)
    }

    async fn tab_process_metrics(&self, tab: TabId) -> Result<Option<ProcessMetrics>, HostError> {
        Ok(self.processes.borrow().get(&tab).copied())
    }

    async fn system_memory(&self) -> Result<SystemMemory, HostError> {
        let mut source = self.memory.borrow_mut();
        let source = source
            .as_mut()
            .ok_or_else(|| HostError::Unavailable("system memory".into()))?;
        source
            .sample()
            .ok_or_else(|| HostError::Unavailable("system memory".into()))
    }

    async fn cpu_info(&self) -> Result<CpuInfo, HostError> {
        self.cpu
            .borrow()
            .clone()
            .ok_or_else(|| HostError::Unavailable("cpu info".into()))
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        let mut tabs = self.tabs.borrow_mut();
        let before = tabs.len();
        tabs.retain(|existing| existing.id != tab);
        if tabs.len() == before {
            return Err(HostError::TabNotFound(tab));
        }
        self.processes.borrow_mut().remove(&tab);
        Ok(())
    }

    async fn focus_tab(&self, tab: TabId) -> Result<(), HostError> {
        let mut tabs = self.tabs.borrow_mut();
        let window = tabs
            .iter()
            .find(|existing| existing.id == tab)
            .map(|existing| existing.window_id)
            .ok_or(HostError::TabNotFound(tab))?;

        for existing in tabs.iter_mut().filter(|existing| existing.window_id == window) {
            existing.active = existing.id == tab;
        }
        Ok(())
    }

    async fn pause_download(&self, id: DownloadId) -> Result<(), HostError> {
        self.with_download(id, |download| {
            if download.state != DownloadState::InProgress {
                return Err(HostError::InvalidDownloadState {
                    id,
                    action: "pause",
                    state: download.state.as_str(),
                });
            }
            download.paused = true;
            Ok(())
        })
    }

    async fn resume_download(&self, id: DownloadId) -> Result<(), HostError> {
        self.with_download(id, |download| {
            let state = download.state;
            match state {
                DownloadState::InProgress => {}
                DownloadState::Interrupted if download.can_resume => {
                    download.state = DownloadState::InProgress;
                }
                _ => {
                    return Err(HostError::InvalidDownloadState {
                        id,
                        action: "resume",
                        state: state.as_str(),
                    })
                }
            }
            download.paused = false;
            Ok(())
        })
    }

    async fn cancel_download(&self, id: DownloadId) -> Result<(), HostError> {
        self.with_download(id, |download| {
            if download.state != DownloadState::InProgress {
                return Err(HostError::InvalidDownloadState {
                    id,
                    action: "cancel",
                    state: download.state.as_str(),
                });
            }
            download.state = DownloadState::Cancelled;
            download.paused = false;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use downloads::DownloadDelta;

    fn start() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn tab(id: u64, window: u64) -> TabInfo {
        let mut tab = TabInfo::new(TabId::new(id), format!("Tab {id}"), "https://example.com");
        tab.window_id = Some(window);
        tab
    }

    #[tokio::test]
    async fn focus_activates_only_within_window() {
        let host = InMemoryHost::new();
        let mut first = tab(1, 1);
        first.active = true;
        host.insert_tab(first);
        host.insert_tab(tab(2, 1));
        let mut other = tab(3, 2);
        other.active = true;
        host.insert_tab(other);

        host.focus_tab(TabId::new(2)).await.unwrap();

        assert!(!host.tab(TabId::new(1)).unwrap().active);
        assert!(host.tab(TabId::new(2)).unwrap().active);
        assert!(host.tab(TabId::new(3)).unwrap().active);
        assert_eq!(
            host.focus_tab(TabId::new(9)).await,
            Err(HostError::TabNotFound(TabId::new(9)))
        );
    }

    #[tokio::test]
    async fn downloads_listed_newest_first_and_bounded() {
        let host = InMemoryHost::new();
        for id in 0..5u64 {
            host.insert_download(DownloadInfo::new(
                DownloadId::new(id),
                format!("file-{id}"),
                start() + Duration::minutes(id as i64),
            ));
        }

        let listed = host.list_downloads(3).await.unwrap();
        let ids: Vec<u64> = listed.iter().map(|d| d.id.get()).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn cancel_rejects_finished_downloads() {
        let host = InMemoryHost::new();
        let id = DownloadId::new(1);
        host.insert_download(DownloadInfo::new(id, "a.iso", start()));
        host.apply_download_event(&DownloadEvent::Changed {
            id,
            delta: DownloadDelta {
                state: Some(DownloadState::Complete),
                ..DownloadDelta::default()
            },
        });

        let err = host.cancel_download(id).await.unwrap_err();
        assert!(matches!(err, HostError::InvalidDownloadState { action: "cancel", .. }));
        assert!(host.pause_download(DownloadId::new(8)).await.is_err());
    }

    #[tokio::test]
    async fn system_memory_requires_a_source() {
        let host = InMemoryHost::new();
        assert!(matches!(
            host.system_memory().await,
            Err(HostError::Unavailable(_))
        ));
    }
}
