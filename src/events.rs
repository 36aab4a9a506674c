use downloads::DownloadEvent;
use serde::{Deserialize, Serialize};
use tabs::TabEvent;

/// Why the host reported an install notification.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallReason {
    Install,
    Update,
    BrowserUpdate,
}

/// Lifecycle notification delivered by the host environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum HostEvent {
    Tab(TabEvent),
    Download(DownloadEvent),
    Installed { reason: InstallReason },
    Startup,
}
