use crate::error::StoreError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    ServerUrl,
    ConnectionId,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::ServerUrl => "data-gov-server-url",
            StateKey::ConnectionId => "ws-connection-id",
        }
    }
}

/// Client-local values that survive restarts.
pub trait StateStore: Send + Sync {
    fn load(&self, key: StateKey) -> Option<String>;
    fn save(&self, key: StateKey, value: &str) -> Result<(), StoreError>;
}

/// One file per key under a state directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: StateKey) -> PathBuf {
        self.dir.join(key.as_str())
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: StateKey) -> Option<String> {
        fs::read_to_string(self.path_for(key))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn save(&self, key: StateKey, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        fs::write(&path, value.as_bytes()).map_err(io_err)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<StateKey, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: StateKey, value: &str) -> Self {
        self.values
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, value.to_string());
        self
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, key: StateKey) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned()
    }

    fn save(&self, key: StateKey, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, value.to_string());
        Ok(())
    }
}
