use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use downloads::DownloadStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabs::TabStore;
use thiserror::Error;
use tokio::sync::broadcast;

mod file;
mod persistence;

pub use file::JsonFileStore;
pub use persistence::{StatsKind, StatsPersistence};

/// Storage key holding tab stats as `[id, record]` pairs.
pub const TAB_STATS_KEY: &str = "tabStats";
/// Storage key holding download stats as `[id, record]` pairs.
pub const DOWNLOAD_STATS_KEY: &str = "downloadStats";
/// Storage key holding user settings.
pub const SETTINGS_KEY: &str = "settings";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Notification that the value stored under `key` changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<Value>,
}

/// Asynchronous key-value persistence shared by every extension surface.
#[async_trait(?Send)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Subscribes to change notifications for every key.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Both stats stores, owned by a single coordinator and lent out by
/// reference.
#[derive(Debug, Default)]
pub struct TrackedStats {
    pub tabs: RefCell<TabStore>,
    pub downloads: RefCell<DownloadStore>,
}

impl TrackedStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// User preferences written on first install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub auto_refresh: bool,
    /// Popup refresh period in milliseconds.
    pub refresh_interval: u64,
    pub show_notifications: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            refresh_interval: 2000,
            show_notifications: true,
        }
    }
}

/// In-process store that broadcasts every write.
#[derive(Debug)]
pub struct MemoryKvStore {
    values: RefCell<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RefCell::new(HashMap::new()),
            changes,
        }
    }

    /// Reads a value without going through the async interface.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.clone());
        // No subscribers is not an error.
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.values.borrow_mut().remove(key).is_some() {
            let _ = self.changes.send(StorageChange {
                key: key.to_string(),
                new_value: None,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
