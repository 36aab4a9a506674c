use chrono::{DateTime, Utc};
use downloads::{DownloadId, DownloadState};
use memory::MetricSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabs::{TabId, TabStatus};
use thiserror::Error;

/// Every action the background answers.
pub const ACTIONS: [&str; 8] = [
    "getTabStats",
    "getDownloadStats",
    "getSystemStats",
    "closeTab",
    "focusTab",
    "pauseDownload",
    "resumeDownload",
    "cancelDownload",
];

/// Request sent by the popup (or any other surface) to the background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetTabStats,
    GetDownloadStats,
    GetSystemStats,
    #[serde(rename_all = "camelCase")]
    CloseTab { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    FocusTab { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    PauseDownload { download_id: DownloadId },
    #[serde(rename_all = "camelCase")]
    ResumeDownload { download_id: DownloadId },
    #[serde(rename_all = "camelCase")]
    CancelDownload { download_id: DownloadId },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("Unknown action")]
    UnknownAction,
    #[error("invalid {action} request: {message}")]
    Malformed { action: String, message: String },
}

impl Request {
    /// Decodes a raw message, telling unknown actions apart from malformed
    /// known ones.
    pub fn parse(message: &Value) -> Result<Self, RequestError> {
        let action = message
            .get("action")
            .and_then(Value::as_str)
            .filter(|action| ACTIONS.contains(action))
            .ok_or(RequestError::UnknownAction)?;

        serde_json::from_value(message.clone()).map_err(|err| RequestError::Malformed {
            action: action.to_string(),
            message: err.to_string(),
        })
    }

    pub fn action(&self) -> &'static str {
        match self {
            Request::GetTabStats => "getTabStats",
            Request::GetDownloadStats => "getDownloadStats",
            Request::GetSystemStats => "getSystemStats",
            Request::CloseTab { .. } => "closeTab",
            Request::FocusTab { .. } => "focusTab",
            Request::PauseDownload { .. } => "pauseDownload",
            Request::ResumeDownload { .. } => "resumeDownload",
            Request::CancelDownload { .. } => "cancelDownload",
        }
    }
}

/// Uniform reply envelope: `{ success, data?, error? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Live tab merged with its tracked statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabStat {
    pub id: TabId,
    pub window_id: Option<u64>,
    pub title: String,
    pub url: String,
    pub active: bool,
    pub status: Option<TabStatus>,
    pub pinned: bool,
    pub audible: bool,
    pub fav_icon_url: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Megabytes.
    pub memory_usage: MetricSource<f64>,
    /// Percent.
    pub cpu_usage: MetricSource<f64>,
}

/// Download merged with its tracked statistics and derived progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStat {
    pub id: DownloadId,
    pub filename: String,
    pub url: String,
    pub state: DownloadState,
    pub paused: bool,
    pub bytes_received: u64,
    pub total_bytes: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub mime: Option<String>,
    pub error: Option<String>,
    /// Percent complete, 0 when the total is unknown.
    pub progress: f64,
    pub bytes_per_second: Option<f64>,
    /// Human readable speed, or `"N/A"`.
    pub speed: String,
    /// Human readable remaining time, or `"N/A"`.
    pub time_remaining: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Coarse system resource figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    /// Synthetic CPU load in percent.
    pub cpu_usage: MetricSource<f64>,
    /// Memory utilization in percent.
    pub memory_usage: MetricSource<f64>,
    pub memory_capacity: Option<u64>,
    pub memory_available: Option<u64>,
    pub tab_count: usize,
    pub active_downloads: usize,
    pub processors: Option<usize>,
    pub cpu_model: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}
