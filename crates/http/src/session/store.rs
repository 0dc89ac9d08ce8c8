//! Persistent token storage
//!
//! The session keeps exactly one token under a single well-known key. The
//! [`TokenStore`] trait is the seam between the client and wherever that
//! key lives; [`FileTokenStore`] is the on-disk analogue of browser local
//! storage and [`MemoryTokenStore`] serves tests and short-lived processes.

use super::token::BearerToken;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Storage error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Token storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a JSON object of strings
    #[error("Token storage is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for the live session token
#[cfg_attr(test, mockall::automock)]
pub trait TokenStore: Send + Sync {
    /// Read the current token, if any
    fn load(&self) -> Result<Option<BearerToken>, StoreError>;

    /// Persist a token, replacing any previous one
    fn save(&self, token: &BearerToken) -> Result<(), StoreError>;

    /// Remove the stored token
    fn clear(&self) -> Result<(), StoreError>;
}

/// In-process token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<BearerToken>>,
}

impl MemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a token
    pub fn with_token(token: BearerToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<BearerToken>, StoreError> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, token: &BearerToken) -> Result<(), StoreError> {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// Token store backed by a JSON key/value file
///
/// Only the configured key is touched; other entries in the file survive
/// every save and clear.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    key: String,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Create a store for `key` inside the file at `path`
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Map<String, Value>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Map::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entries(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<BearerToken>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let entries = self.read_entries()?;
        Ok(entries
            .get(&self.key)
            .and_then(Value::as_str)
            .and_then(BearerToken::new))
    }

    fn save(&self, token: &BearerToken) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries = self.read_entries()?;
        entries.insert(self.key.clone(), Value::String(token.as_str().to_string()));
        self.write_entries(&entries)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries = self.read_entries()?;
        if entries.remove(&self.key).is_some() {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token(raw: &str) -> BearerToken {
        BearerToken::new(raw).unwrap()
    }

    #[test]
    fn memory_store_overwrites_and_clears() {
        let store = MemoryTokenStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&token("first")).unwrap();
        store.save(&token("second")).unwrap();
        assert_eq!(store.load().unwrap(), Some(token("second")));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("storage.json"), "Authorization");
        assert!(store.load().unwrap().is_none());
        // Clearing a missing key must not create the file
        store.clear().unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        FileTokenStore::new(&path, "Authorization")
            .save(&token("Bearer abc123"))
            .unwrap();

        let reopened = FileTokenStore::new(&path, "Authorization");
        assert_eq!(reopened.load().unwrap(), Some(token("abc123")));
    }

    #[test]
    fn file_store_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, r#"{"theme":"dark","Authorization":"old"}"#).unwrap();

        let store = FileTokenStore::new(&path, "Authorization");
        store.save(&token("new456")).unwrap();
        store.clear().unwrap();

        let content: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(content.get("theme"), Some(&Value::String("dark".into())));
        assert!(!content.contains_key("Authorization"));
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileTokenStore::new(&path, "Authorization");
        assert!(matches!(store.load(), Err(StoreError::Serialization(_))));
    }
}
