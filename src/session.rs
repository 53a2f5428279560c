//! Key/value stores backing per-session and durable client state.
//!
//! The portal keeps a handful of small cross-view values: the geocode
//! cache, selected-id-per-entity, panel widths (session-scoped), and the
//! dismissed-notification id set (durable). Components take the store as
//! an explicit dependency rather than reaching for ambient global state,
//! so tests can hand them an in-memory fake.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Minimal key/value contract. Values are JSON; typed access goes through
/// the `get_typed` / `set_typed` helpers.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
}

/// Read a typed value; malformed or missing entries yield `None` rather
/// than an error (fail-safe per the dismissed-set contract).
pub fn get_typed<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("Discarding malformed persisted value for {key}: {e}");
            None
        }
    }
}

pub fn set_typed<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => store.set(key, v),
        Err(e) => log::warn!("Failed to serialize value for {key}: {e}"),
    }
}

/// In-memory store: the test fake, also used for throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

/// File-backed store: one JSON object per file under `~/.patina/`.
///
/// The whole map is rewritten on every set; values here are small (a few
/// ids, panel widths, a geocode cache) so this stays cheap. A corrupt or
/// unreadable file loads as empty — client state is never worth a crash.
pub struct FileStore {
    path: PathBuf,
    values: RwLock<HashMap<String, Value>>,
}

impl FileStore {
    pub fn open(path: PathBuf) -> Self {
        let values = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!(
                        "Corrupt state file {}: {} — starting empty",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            values: RwLock::new(values),
        }
    }

    /// Open a named store under `~/.patina/` (e.g. "session", "dismissed").
    pub fn open_named(name: &str) -> Option<Self> {
        let home = dirs::home_dir()?;
        let dir = home.join(".patina");
        if !dir.exists() {
            if let Err(e) = fs::create_dir_all(&dir) {
                log::warn!("Failed to create state dir: {e}");
                return None;
            }
        }
        Some(Self::open(dir.join(format!("{name}.json"))))
    }

    fn persist(&self) {
        let snapshot = self.values.read().clone();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(content) => {
                if let Err(e) = fs::write(&self.path, content) {
                    log::warn!("Failed to persist {}: {e}", self.path.display());
                }
            }
            Err(e) => log::warn!("Failed to serialize state map: {e}"),
        }
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value);
        self.persist();
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
        self.persist();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_round_trip() {
        let store = MemoryStore::new();
        set_typed(&store, "widths", &vec![280, 360]);
        let widths: Vec<i64> = get_typed(&store, "widths").expect("value");
        assert_eq!(widths, vec![280, 360]);
    }

    #[test]
    fn test_malformed_value_yields_none() {
        let store = MemoryStore::new();
        store.set("count", Value::String("not a number".to_string()));
        assert!(get_typed::<u32>(&store, "count").is_none());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let store = FileStore::open(path.clone());
        set_typed(&store, "lastSelected", &"lead-12".to_string());
        drop(store);

        let store = FileStore::open(path);
        let value: String = get_typed(&store, "lastSelected").expect("value");
        assert_eq!(value, "lead-12");
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").expect("write");

        let store = FileStore::open(path);
        assert!(store.get("anything").is_none());

        // And the store is still writable afterwards
        set_typed(&store, "k", &1);
        assert_eq!(get_typed::<i64>(&store, "k"), Some(1));
    }
}
