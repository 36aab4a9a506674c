use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use downloads::{DownloadId, DownloadRecord};
use serde_json::Value;
use tabs::{TabId, TabRecord};
use tracing::{debug, info, warn};

use crate::{
    KeyValueStore, Settings, StorageChange, StorageError, TrackedStats, CHANGE_CHANNEL_CAPACITY,
    DOWNLOAD_STATS_KEY, SETTINGS_KEY, TAB_STATS_KEY,
};

/// Which stats store a storage key maps to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StatsKind {
    Tabs,
    Downloads,
}

impl StatsKind {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            TAB_STATS_KEY => Some(Self::Tabs),
            DOWNLOAD_STATS_KEY => Some(Self::Downloads),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Tabs => TAB_STATS_KEY,
            Self::Downloads => DOWNLOAD_STATS_KEY,
        }
    }
}

/// Serializes the stats stores to key-value storage and reloads them when
/// another surface writes.
///
/// The persisted copy is never a second source of truth: a reload replaces
/// the in-memory store wholesale. Clones share the queue of their own
/// writes, so notifications echoing those writes are not reloaded.
#[derive(Clone)]
pub struct StatsPersistence {
    store: Rc<dyn KeyValueStore>,
    pending: Rc<RefCell<HashMap<StatsKind, VecDeque<Value>>>>,
}

impl StatsPersistence {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            pending: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Rc<dyn KeyValueStore> {
        &self.store
    }

    /// Writes the tab store. Failures are logged and swallowed.
    pub async fn flush_tabs(&self, stats: &TrackedStats) -> bool {
        let entries = stats.tabs.borrow().entries();
        self.write(StatsKind::Tabs, serde_json::to_value(entries))
            .await
    }

    /// Writes the download store. Failures are logged and swallowed.
    pub async fn flush_downloads(&self, stats: &TrackedStats) -> bool {
        let entries = stats.downloads.borrow().entries();
        self.write(StatsKind::Downloads, serde_json::to_value(entries))
            .await
    }

    /// Writes both stores; returns whether both writes succeeded.
    pub async fn flush_all(&self, stats: &TrackedStats) -> bool {
        let tabs = self.flush_tabs(stats).await;
        let downloads = self.flush_downloads(stats).await;
        tabs && downloads
    }

    async fn write(&self, kind: StatsKind, payload: Result<Value, serde_json::Error>) -> bool {
        let payload = match payload {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event = "stats_encode_failed", key = kind.key(), error = %err);
                return false;
            }
        };

        self.remember_write(kind, payload.clone());
        match self.store.set(kind.key(), payload.clone()).await {
            Ok(()) => {
                debug!(event = "stats_flushed", key = kind.key());
                true
            }
            Err(err) => {
                self.forget_write(kind, &payload);
                warn!(event = "stats_flush_failed", key = kind.key(), error = %err);
                false
            }
        }
    }

    fn remember_write(&self, kind: StatsKind, payload: Value) {
        let mut pending = self.pending.borrow_mut();
        let queue = pending.entry(kind).or_default();
        if queue.len() == CHANGE_CHANNEL_CAPACITY {
            queue.pop_front();
        }
        queue.push_back(payload);
    }

    fn forget_write(&self, kind: StatsKind, payload: &Value) {
        let mut pending = self.pending.borrow_mut();
        if let Some(queue) = pending.get_mut(&kind) {
            if let Some(position) = queue.iter().rposition(|written| written == payload) {
                queue.remove(position);
            }
        }
    }

    /// Consumes the oldest pending write matching `value`, along with any
    /// older ones whose notifications were lost.
    fn take_echo(&self, kind: StatsKind, value: &Value) -> bool {
        let mut pending = self.pending.borrow_mut();
        let Some(queue) = pending.get_mut(&kind) else {
            return false;
        };
        match queue.iter().position(|written| written == value) {
            Some(position) => {
                queue.drain(..=position);
                true
            }
            None => false,
        }
    }

    /// Applies a change made by another surface.
    ///
    /// Known stats keys replace the matching store wholesale, or clear it
    /// when the value was removed. Undecodable values leave the store as it
    /// was, and echoes of this surface's own writes are skipped.
    /// Returns the store that was replaced.
    pub fn on_external_change(
        &self,
        stats: &TrackedStats,
        change: &StorageChange,
    ) -> Option<StatsKind> {
        let kind = StatsKind::from_key(&change.key)?;
        if let Some(value) = &change.new_value {
            if self.take_echo(kind, value) {
                return None;
            }
        }
        match replace_from_value(stats, kind, change.new_value.clone()) {
            Ok(count) => {
                debug!(event = "stats_reloaded", key = kind.key(), count);
                Some(kind)
            }
            Err(err) => {
                warn!(event = "stats_reload_failed", key = kind.key(), error = %err);
                None
            }
        }
    }

    /// Loads both stores from storage, typically on startup.
    pub async fn load_all(&self, stats: &TrackedStats) -> Result<(), StorageError> {
        for kind in [StatsKind::Tabs, StatsKind::Downloads] {
            let value = self.store.get(kind.key()).await?;
            let count = replace_from_value(stats, kind, value)?;
            info!(event = "stats_loaded", key = kind.key(), count);
        }
        Ok(())
    }

    /// Writes `defaults` unless settings already exist. Returns whether the
    /// defaults were written.
    pub async fn ensure_settings(&self, defaults: &Settings) -> Result<bool, StorageError> {
        if self.store.get(SETTINGS_KEY).await?.is_some() {
            return Ok(false);
        }
        self.store
            .set(SETTINGS_KEY, serde_json::to_value(defaults)?)
            .await?;
        info!(event = "settings_initialized");
        Ok(true)
    }
}

fn replace_from_value(
    stats: &TrackedStats,
    kind: StatsKind,
    value: Option<Value>,
) -> Result<usize, StorageError> {
    match kind {
        StatsKind::Tabs => {
            let entries: Vec<(TabId, TabRecord)> = decode_pairs(value)?;
            let count = entries.len();
            stats.tabs.borrow_mut().replace_all(entries);
            Ok(count)
        }
        StatsKind::Downloads => {
            let entries: Vec<(DownloadId, DownloadRecord)> = decode_pairs(value)?;
            let count = entries.len();
            stats.downloads.borrow_mut().replace_all(entries);
            Ok(count)
        }
    }
}

fn decode_pairs<T>(value: Option<Value>) -> Result<Vec<T>, StorageError>
where
    T: serde::de::DeserializeOwned,
{
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}
