//! Key-value persistence.
//!
//! Each manager owns exactly one key in a [`KeyValueStore`] and is its only
//! writer. Values are JSON strings; every mutation overwrites the whole
//! value.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Keys owned by the managers.
pub mod keys {
    /// Accessory inventory (owned by `AccessoryInventory`).
    pub const ACCESSORY_INVENTORY: &str = "reading-buddies-accessory-inventory";
    /// Audio settings (owned by `AudioController`).
    pub const AUDIO_SETTINGS: &str = "reading-buddies-audio-settings";
    /// Egg progress map (owned by `ProgressTracker`).
    pub const EGG_PROGRESS: &str = "reading-buddies-egg-progress";
    /// Analytics events that could not be delivered.
    pub const ANALYTICS_BACKUP: &str = "reading-buddies-analytics-backup";
    /// Analytics configuration.
    pub const ANALYTICS_CONFIG: &str = "reading-buddies-analytics-config";
    /// Analytics session identifier.
    pub const SESSION_ID: &str = "reading-buddies-session-id";
}

/// A string-keyed, string-valued store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON value.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| Error::Serialization {
                context: format!("stored value '{}'", key),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub fn write_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|source| Error::Serialization {
        context: format!("stored value '{}'", key),
        source,
    })?;
    store.set(key, &raw)
}

fn lock(map: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write fails as a full browser store would.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Keys currently present.
    pub fn keys(&self) -> Vec<String> {
        lock(&self.values).keys().cloned().collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::storage(key, "store is read-only"));
        }
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::storage(key, "store is read-only"));
        }
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// The whole file is rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let values = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| Error::Serialization {
                    context: format!("state file '{}'", path.display()),
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(Error::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(values).map_err(|source| {
            Error::Serialization {
                context: format!("state file '{}'", self.path.display()),
                source,
            }
        })?;

        std::fs::write(&self.path, content).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = lock(&self.values);
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_memory_store_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        store.delete("a").unwrap();
    }

    #[test]
    fn test_memory_store_read_only() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        store.set_read_only(true);

        assert!(matches!(store.set("a", "2"), Err(Error::Storage { .. })));
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "egg".to_string(),
            count: 3,
        };
        write_json(&store, "sample", &sample).unwrap();
        assert_eq!(read_json::<Sample>(&store, "sample").unwrap(), Some(sample));
        assert_eq!(read_json::<Sample>(&store, "missing").unwrap(), None);

        store.set("broken", "{not json").unwrap();
        assert!(matches!(
            read_json::<Sample>(&store, "broken"),
            Err(Error::Serialization { .. })
        ));
    }

    #[test]
    fn test_file_store_persists_across_opens() {
        let path = std::env::temp_dir().join(format!(
            "reading_buddies_store_{}.json",
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();

        let store = FileStore::open(&path).expect("should open missing file");
        store.set(keys::EGG_PROGRESS, "{}").unwrap();
        store.set(keys::SESSION_ID, "session-1").unwrap();
        store.delete(keys::SESSION_ID).unwrap();

        let reopened = FileStore::open(&path).expect("should reopen");
        assert_eq!(
            reopened.get(keys::EGG_PROGRESS).unwrap().as_deref(),
            Some("{}")
        );
        assert_eq!(reopened.get(keys::SESSION_ID).unwrap(), None);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let path = std::env::temp_dir().join(format!(
            "reading_buddies_corrupt_{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "[1, 2").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(Error::Serialization { .. })
        ));

        std::fs::remove_file(&path).ok();
    }
}
