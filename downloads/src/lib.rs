use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use util::StatsStore;

/// Identifier of a download, assigned by the host.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DownloadId(u64);

impl DownloadId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Download state as reported by the host. Transitions are not validated.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    InProgress,
    Complete,
    Interrupted,
    Cancelled,
}

impl DownloadState {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadState::InProgress => "in_progress",
            DownloadState::Complete => "complete",
            DownloadState::Interrupted => "interrupted",
            DownloadState::Cancelled => "cancelled",
        }
    }
}

/// Host-side snapshot of a download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    pub id: DownloadId,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub state: DownloadState,
    #[serde(default)]
    pub bytes_received: u64,
    /// Zero when the host does not know the final size.
    #[serde(default)]
    pub total_bytes: u64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub can_resume: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl DownloadInfo {
    pub fn new(id: DownloadId, filename: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            filename: filename.into(),
            url: String::new(),
            state: DownloadState::InProgress,
            bytes_received: 0,
            total_bytes: 0,
            start_time,
            end_time: None,
            mime: None,
            paused: false,
            can_resume: false,
            error: None,
        }
    }
}

/// Tracked statistics for a single download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub id: DownloadId,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub state: DownloadState,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DownloadRecord {
    /// Empty record used when a delta arrives for an unknown download.
    pub fn empty(id: DownloadId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            filename: String::new(),
            url: String::new(),
            state: DownloadState::InProgress,
            bytes_received: 0,
            total_bytes: 0,
            created_at: now,
            last_updated: None,
        }
    }

    /// Builds a record from the host's initial snapshot.
    pub fn from_info(info: &DownloadInfo, now: DateTime<Utc>) -> Self {
        Self {
            id: info.id,
            filename: info.filename.clone(),
            url: info.url.clone(),
            state: info.state,
            bytes_received: info.bytes_received,
            total_bytes: info.total_bytes,
            created_at: now,
            last_updated: None,
        }
    }

    pub fn last_observed(&self) -> DateTime<Utc> {
        self.last_updated.unwrap_or(self.created_at)
    }

    /// Applies the fields present in `delta`, leaving the rest untouched.
    pub fn apply_delta(&mut self, delta: &DownloadDelta, now: DateTime<Utc>) {
        if let Some(state) = delta.state {
            self.state = state;
        }
        if let Some(bytes_received) = delta.bytes_received {
            self.bytes_received = bytes_received;
        }
        if let Some(total_bytes) = delta.total_bytes {
            self.total_bytes = total_bytes;
        }
        if let Some(filename) = &delta.filename {
            self.filename = filename.clone();
        }
        self.last_updated = Some(now);
    }
}

pub type DownloadStore = StatsStore<DownloadId, DownloadRecord>;

/// Partial change notification for a download.
///
/// Fields decode independently: a value of the wrong shape is dropped with
/// a warning and the remaining fields still apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDelta {
    #[serde(default, deserialize_with = "lenient")]
    pub state: Option<DownloadState>,
    #[serde(default, deserialize_with = "lenient")]
    pub bytes_received: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub total_bytes: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub paused: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub error: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value.clone()) {
        Ok(field) => Ok(Some(field)),
        Err(err) => {
            warn!(event = "delta_field_ignored", value = %value, error = %err);
            Ok(None)
        }
    }
}

/// Download lifecycle notification emitted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DownloadEvent {
    Created { download: DownloadInfo },
    Changed { id: DownloadId, delta: DownloadDelta },
}

/// Applies a download lifecycle event to the store. Never fails.
pub fn apply_download_event(store: &mut DownloadStore, event: &DownloadEvent, now: DateTime<Utc>) {
    match event {
        DownloadEvent::Created { download } => {
            store.set(download.id, DownloadRecord::from_info(download, now));
            debug!(event = "download_created", download_id = %download.id);
        }
        DownloadEvent::Changed { id, delta } => {
            if !store.contains(*id) {
                store.set(*id, DownloadRecord::empty(*id, now));
            }
            if let Some(record) = store.get_mut(*id) {
                record.apply_delta(delta, now);
                debug!(
                    event = "download_changed",
                    download_id = %id,
                    state = record.state.as_str(),
                    bytes_received = record.bytes_received
                );
            }
        }
    }
}
