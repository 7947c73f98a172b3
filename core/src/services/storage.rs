use async_trait::async_trait;
use directories::ProjectDirs;
use parking_lot::Mutex as SyncMutex;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tokio::{fs, sync::Mutex};

use crate::error::{InboxError, Result};

/// String keyed, string valued persistent store of the local device.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Retrieve a value by key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value under a key, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Store `value` only if the current value equals `expected` (`None`
    /// meaning absent). Returns whether the write happened.
    async fn compare_and_swap(&self, key: &str, expected: Option<&str>, value: &str)
        -> Result<bool>;
}

/// JSON file backed key-value storage, one object per file.
pub struct FileKvStore {
    file: PathBuf,
    data: Mutex<HashMap<String, String>>,
}

impl FileKvStore {
    /// Open (or create) the store file `kv.json` inside `dir`.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let file = dir.join("kv.json");
        let data = match fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(file = %file.display(), "discarding unreadable store: {e}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            file,
            data: Mutex::new(data),
        })
    }

    /// Replace the file atomically so a crash never leaves it half written.
    async fn persist(&self, data: &HashMap<String, String>) -> Result<()> {
        let bytes = serde_json::to_vec(data)?;
        let tmp = self.file.with_extension("json.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &self.file).await?;
        Ok(())
    }

    async fn write_locked(
        &self,
        data: &mut HashMap<String, String>,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let previous = data.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(data).await {
            match previous {
                Some(p) => data.insert(key.to_string(), p),
                None => data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        self.write_locked(&mut data, key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let mut data = self.data.lock().await;
        if data.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        self.write_locked(&mut data, key, value).await?;
        Ok(true)
    }
}

/// In-process store that forgets everything on exit.
#[derive(Default)]
pub struct MemoryKvStore {
    data: SyncMutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.lock().insert(key.into(), value.into());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let mut data = self.data.lock();
        if data.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        data.insert(key.into(), value.into());
        Ok(true)
    }
}

/// Platform data directory for the inbox, e.g. `~/.local/share/inbox`.
pub fn default_data_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("app", "feminiq", "inbox").ok_or(InboxError::NoDataDir)?;
    Ok(proj.data_dir().to_path_buf())
}
