//! Best-effort draft persistence.
//!
//! Snapshots are `{ "values": {...}, "timestamp": <epoch ms>, "currentPage": n }`
//! stored under one caller-provided key. Storage failures are logged and
//! swallowed.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use form_spec::ValueMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;

/// Pluggable durable key-value store.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub values: ValueMap,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub current_page: usize,
}

/// Field names never written to a draft: exact names and glob patterns.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    names: BTreeSet<String>,
    globs: Option<GlobSet>,
}

impl Exclusions {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names = BTreeSet::new();
        let mut builder = GlobSetBuilder::new();
        let mut has_globs = false;
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if !pattern.contains(['*', '?', '[', '{']) {
                names.insert(pattern.to_string());
                continue;
            }
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    has_globs = true;
                }
                Err(err) => {
                    warn!(%pattern, error = %err, "invalid exclusion pattern");
                    names.insert(pattern.to_string());
                }
            }
        }
        let globs = if has_globs {
            builder
                .build()
                .inspect_err(|err| warn!(error = %err, "failed to compile exclusion patterns"))
                .ok()
        } else {
            None
        };
        Self { names, globs }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.names.contains(name)
            || self
                .globs
                .as_ref()
                .is_some_and(|globs| globs.is_match(name))
    }
}

pub struct PersistenceManager {
    key: String,
    store: Box<dyn KeyValueStore>,
    exclusions: Exclusions,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("key", &self.key)
            .field("exclusions", &self.exclusions)
            .finish()
    }
}

impl PersistenceManager {
    pub fn new(
        key: impl Into<String>,
        store: Box<dyn KeyValueStore>,
        exclusions: Exclusions,
    ) -> Self {
        Self {
            key: key.into(),
            store,
            exclusions,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclusions.is_excluded(name)
    }

    /// Builds the snapshot for `names` (field names in declaration order).
    pub fn snapshot<'a, I>(
        &self,
        names: I,
        values: &ValueMap,
        current_page: usize,
    ) -> PersistedSnapshot
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut kept = ValueMap::new();
        for name in names {
            if self.is_excluded(name) {
                continue;
            }
            if let Some(value) = values.get(name)
                && kept.set(name, value.clone()).is_err()
            {
                debug!(field = %name, "skipping unaddressable field in snapshot");
            }
        }
        PersistedSnapshot {
            values: kept,
            timestamp: chrono::Utc::now().timestamp_millis(),
            current_page,
        }
    }

    pub fn save(&mut self, snapshot: &PersistedSnapshot) -> bool {
        let result = serde_json::to_string(snapshot)
            .map_err(StorageError::from)
            .and_then(|raw| self.store.set(&self.key, &raw));
        match result {
            Ok(()) => {
                debug!(key = %self.key, "draft saved");
                true
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to save draft");
                false
            }
        }
    }

    pub fn load(&self) -> Option<PersistedSnapshot> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to read draft");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(key = %self.key, error = %err, "ignoring unreadable draft");
                None
            }
        }
    }

    pub fn clear(&mut self) {
        if let Err(err) = self.store.remove(&self.key) {
            warn!(key = %self.key, error = %err, "failed to clear draft");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }

        fn remove(&mut self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("quota exceeded".into()))
        }
    }

    #[test]
    fn exclusions_match_names_and_globs() {
        let exclusions = Exclusions::new(["ssn", "card.*"]);
        assert!(exclusions.is_excluded("ssn"));
        assert!(exclusions.is_excluded("card.number"));
        assert!(!exclusions.is_excluded("age"));
    }

    #[test]
    fn snapshot_uses_camel_case_and_drops_excluded() {
        let manager = PersistenceManager::new(
            "draft",
            Box::new(MemoryStore::new()),
            Exclusions::new(["ssn"]),
        );
        let values = ValueMap::from_json(json!({ "a": 1, "ssn": "123" }));
        let names = vec!["a".to_string(), "ssn".to_string()];
        let snapshot = manager.snapshot(&names, &values, 2);

        let encoded = serde_json::to_value(&snapshot).expect("encode");
        assert_eq!(encoded["values"], json!({ "a": 1 }));
        assert_eq!(encoded["currentPage"], json!(2));
        assert!(encoded["timestamp"].is_i64());
    }

    #[test]
    fn memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let mut manager =
            PersistenceManager::new("k", Box::new(store.clone()), Exclusions::default());
        let snapshot = manager.snapshot(&[], &ValueMap::new(), 1);
        assert!(manager.save(&snapshot));
        assert!(store.raw("k").is_some());
        manager.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FileStore::new(dir.path().join("drafts"));
        assert_eq!(store.get("risk/intake").expect("get"), None);
        store.set("risk/intake", "{}").expect("set");
        assert!(store.path_for("risk/intake").ends_with("risk_intake.json"));
        assert_eq!(store.get("risk/intake").expect("get").as_deref(), Some("{}"));
        store.remove("risk/intake").expect("remove");
        store.remove("risk/intake").expect("remove twice");
    }

    #[test]
    fn storage_failures_are_swallowed() {
        let mut manager =
            PersistenceManager::new("k", Box::new(BrokenStore), Exclusions::default());
        let snapshot = manager.snapshot(&[], &ValueMap::new(), 1);
        assert!(!manager.save(&snapshot));
        assert!(manager.load().is_none());
        manager.clear();
    }
}
