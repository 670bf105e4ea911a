//! Key-value persistence for settings and sessions.
//!
//! Values are JSON documents. The file store keeps one `<key>.json` per key
//! inside the data directory.

use directories::ProjectDirs;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const SETTINGS_KEY: &str = "timerSettings";
pub const SESSIONS_KEY: &str = "savedSessions";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Store lock poisoned")]
    Poisoned,
}

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_data_dir() -> Result<PathBuf, StoreError> {
        let proj_dirs =
            ProjectDirs::from("com", "pabloagn", "Kairos").ok_or(StoreError::NoDataDir)?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        // write-then-rename: readers only ever see a complete document
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

/// In-process store used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: &str, value: &str) -> Self {
        let store = Self::new();
        if let Ok(mut data) = store.data.lock() {
            data.insert(key.to_string(), value.to_string());
        }
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        data.remove(key);
        Ok(())
    }
}

impl<T: KeyValueStore + Sync> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));

        assert_eq!(store.get(SESSIONS_KEY).unwrap(), None);
        store.set(SESSIONS_KEY, "[]").unwrap();
        assert_eq!(store.get(SESSIONS_KEY).unwrap().as_deref(), Some("[]"));
        assert!(dir.path().join("nested/savedSessions.json").exists());

        store.remove(SESSIONS_KEY).unwrap();
        assert_eq!(store.get(SESSIONS_KEY).unwrap(), None);
        // removing twice is fine
        store.remove(SESSIONS_KEY).unwrap();
    }

    #[test]
    fn memory_store_keeps_keys_apart() {
        let store = MemoryStore::with(SETTINGS_KEY, "{}");
        store.set(SESSIONS_KEY, "[]").unwrap();
        assert_eq!(store.get(SETTINGS_KEY).unwrap().as_deref(), Some("{}"));
        assert_eq!(store.get(SESSIONS_KEY).unwrap().as_deref(), Some("[]"));
    }
}
