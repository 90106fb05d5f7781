//! Cache store
//!
//! Content-addressable key/value store for named byte blobs, surviving
//! across pipeline runs. Keys are opaque strings; blobs are opaque byte
//! payloads. No key is ever overwritten: saves always mint fresh keys
//! upstream, and a colliding save is rejected here.
//!
//! Layout: blobs under `<root>/blobs/`, plus a JSON index mapping keys to
//! blob files. The index is rewritten atomically on every save.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    saved_at: chrono::DateTime<chrono::Utc>,
    size: u64,
}

/// Filesystem-backed cache store
pub struct CacheStore {
    root: PathBuf,
    index: Mutex<CacheIndex>,
}

impl CacheStore {
    /// Opens (or initializes) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("blobs"))
            .map_err(|err| StoreError::io(format!("creating {}", root.display()), err))?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let raw = std::fs::read(&index_path)
                .map_err(|err| StoreError::io(format!("reading {}", index_path.display()), err))?;
            serde_json::from_slice(&raw)?
        } else {
            CacheIndex::default()
        };

        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    /// Save a blob under a new key. Saving an existing key fails with
    /// `KeyExists`; existing blobs are never touched.
    pub fn save(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        let mut index = self.index.lock().unwrap();
        if index.entries.contains_key(key) {
            return Err(StoreError::KeyExists(key.to_string()));
        }

        let file = format!("{}.blob", Uuid::new_v4());
        let path = self.root.join("blobs").join(&file);
        std::fs::write(&path, blob)
            .map_err(|err| StoreError::io(format!("writing {}", path.display()), err))?;

        index.entries.insert(
            key.to_string(),
            IndexEntry {
                file,
                saved_at: chrono::Utc::now(),
                size: blob.len() as u64,
            },
        );
        self.persist_index(&index)?;

        debug!(key, size = blob.len(), "cache entry saved");
        Ok(())
    }

    /// Exact-key restore.
    pub fn restore(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let index = self.index.lock().unwrap();
        let Some(entry) = index.entries.get(key) else {
            return Ok(None);
        };
        self.read_blob(entry).map(Some)
    }

    /// Best-effort prefix restore: returns the most specific previously
    /// saved key sharing `prefix` (longest key; ties broken by the
    /// lexicographically greatest, i.e. most recent discriminator).
    pub fn restore_by_prefix(&self, prefix: &str) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let index = self.index.lock().unwrap();
        let Some((key, entry)) = index
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .max_by_key(|(key, _)| (key.len(), key.to_owned()))
        else {
            return Ok(None);
        };
        let blob = self.read_blob(entry)?;
        Ok(Some((key.clone(), blob)))
    }

    fn read_blob(&self, entry: &IndexEntry) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join("blobs").join(&entry.file);
        std::fs::read(&path)
            .map_err(|err| StoreError::io(format!("reading {}", path.display()), err))
    }

    /// Rewrites the index atomically (write-to-temp then rename).
    fn persist_index(&self, index: &CacheIndex) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(index)?;
        let temp = self.root.join(format!("{INDEX_FILE}.tmp"));
        let path = self.root.join(INDEX_FILE);
        std::fs::write(&temp, raw)
            .map_err(|err| StoreError::io(format!("writing {}", temp.display()), err))?;
        std::fs::rename(&temp, &path)
            .map_err(|err| StoreError::io(format!("renaming {}", path.display()), err))?;
        Ok(())
    }
}
