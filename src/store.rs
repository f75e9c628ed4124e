//! Durable local persistence for resource maps.
//!
//! One pretty-printed JSON document per resource id, stored at
//! `<maps_dir>/<resource_id>.json`. Maps are immutable once persisted, so
//! concurrent readers need no locking; `save` is last-write-wins.
//!
//! [`MapStore::find_by_hash`] is the content-addressed deduplication lookup:
//! a linear scan over the stored maps' `source_hash` metadata. The store is
//! locally bounded (hundreds to low thousands of maps), so no index is kept;
//! corrupt or unreadable entries are skipped rather than failing the scan.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::ResourceMap;

/// Map store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no map found for resource '{0}'")]
    NotFound(String),
    #[error("map store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("map for resource '{id}' is not valid JSON: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize map for resource '{id}': {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON-file-per-map store keyed by resource id.
#[derive(Debug, Clone)]
pub struct MapStore {
    maps_dir: PathBuf,
}

impl MapStore {
    pub fn new(maps_dir: impl Into<PathBuf>) -> Self {
        Self { maps_dir: maps_dir.into() }
    }

    /// Directory this store persists into.
    pub fn maps_dir(&self) -> &Path {
        &self.maps_dir
    }

    fn map_path(&self, resource_id: &str) -> PathBuf {
        self.maps_dir.join(format!("{}.json", resource_id))
    }

    /// Persist a map, overwriting any existing map with the same resource id.
    pub async fn save(&self, map: &ResourceMap) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.maps_dir).await?;
        let json = serde_json::to_vec_pretty(map).map_err(|source| StoreError::Serialize {
            id: map.resource_id.clone(),
            source,
        })?;
        tokio::fs::write(self.map_path(&map.resource_id), json).await?;
        Ok(())
    }

    /// Load a map by resource id.
    pub async fn load(&self, resource_id: &str) -> Result<ResourceMap, StoreError> {
        let path = self.map_path(resource_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(resource_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            id: resource_id.to_string(),
            source,
        })
    }

    /// List all stored resource ids, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.maps_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load every readable map. Corrupt entries are skipped.
    pub async fn load_all(&self) -> Result<Vec<ResourceMap>, StoreError> {
        let mut maps = Vec::new();
        for id in self.list().await? {
            if let Ok(map) = self.load(&id).await {
                maps.push(map);
            }
        }
        Ok(maps)
    }

    /// Find a stored map whose `source_hash` metadata matches `hash`.
    ///
    /// Used by ingestion before any provider call: byte-identical content
    /// under any path collapses to the already-stored map.
    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<ResourceMap>, StoreError> {
        for id in self.list().await? {
            match self.load(&id).await {
                Ok(map) => {
                    if map.source_hash() == Some(hash) {
                        return Ok(Some(map));
                    }
                }
                // Tolerate corrupt entries; they only lose dedup for
                // themselves.
                Err(StoreError::Corrupt { .. }) | Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, Modality, Node, META_SOURCE_HASH};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn sample_map(resource_id: &str, hash: &str) -> ResourceMap {
        let mut metadata = BTreeMap::new();
        metadata.insert(META_SOURCE_HASH.to_string(), serde_json::json!(hash));
        ResourceMap {
            resource_id: resource_id.to_string(),
            modality: Modality::Document,
            title: resource_id.to_string(),
            source_path: format!("/tmp/{}.pdf", resource_id),
            nodes: vec![Node {
                id: "ch1".to_string(),
                title: Some("Chapter 1".to_string()),
                kind: "section".to_string(),
                location: Location::Document { pages: vec![1, 2] },
                summary: None,
                children: vec![],
            }],
            metadata,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path());

        let map = sample_map("book", "abc123");
        store.save(&map).await.unwrap();

        let loaded = store.load("book").await.unwrap();
        assert_eq!(loaded, map);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path());
        assert!(matches!(
            store.load("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path());
        store.save(&sample_map("zeta", "h1")).await.unwrap();
        store.save(&sample_map("alpha", "h2")).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_list_empty_when_dir_missing() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("never_created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_hash() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path());
        store.save(&sample_map("a", "hash_a")).await.unwrap();
        store.save(&sample_map("b", "hash_b")).await.unwrap();

        let found = store.find_by_hash("hash_b").await.unwrap().unwrap();
        assert_eq!(found.resource_id, "b");
        assert!(store.find_by_hash("hash_c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_hash_skips_corrupt_entries() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path());
        store.save(&sample_map("good", "hash_good")).await.unwrap();
        std::fs::write(tmp.path().join("bad.json"), "{not json").unwrap();

        let found = store.find_by_hash("hash_good").await.unwrap().unwrap();
        assert_eq!(found.resource_id, "good");
    }

    #[tokio::test]
    async fn test_save_is_last_write_wins() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path());
        store.save(&sample_map("dup", "h1")).await.unwrap();
        store.save(&sample_map("dup", "h2")).await.unwrap();
        let loaded = store.load("dup").await.unwrap();
        assert_eq!(loaded.source_hash(), Some("h2"));
    }
}
