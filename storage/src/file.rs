use std::cell::RefCell;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{KeyValueStore, StorageChange, StorageError, CHANGE_CHANNEL_CAPACITY};

/// Key-value store persisted as a single JSON object on disk.
///
/// Every write rewrites the whole document through a temporary file and a
/// rename, so readers never observe a partial document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RefCell<Map<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty when the file is missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Map::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            values: RefCell::new(values),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(&*self.values.borrow())?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(event = "state_file_written", path = %self.path.display());
        Ok(())
    }

    fn notify(&self, key: &str, new_value: Option<Value>) {
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
        });
    }
}

#[async_trait(?Send)]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.borrow().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.clone());
        self.persist().await?;
        self.notify(key, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = self.values.borrow_mut().remove(key).is_some();
        if removed {
            self.persist().await?;
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
