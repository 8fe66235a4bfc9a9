//! Bidirectional identifier index between remote calendar events and
//! scheduled entities.
//!
//! Both directional tables are only ever mutated through `put` and the two
//! `remove_by_*` methods, each of which touches both tables.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Default, Clone)]
pub struct MappingStore {
    remote_to_local: HashMap<String, String>,
    local_to_remote: HashMap<String, String>,
}

/// Durable form of the store: two tables, remote→local and local→remote.
///
/// `BTreeMap` keeps the written file deterministic.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    pub remote_to_local: BTreeMap<String, String>,
    pub local_to_remote: BTreeMap<String, String>,
}

/// Sizes of both directions, exposed to the health surface.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MappingCounts {
    pub remote_to_local: usize,
    pub local_to_remote: usize,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_local(&self, remote_id: &str) -> Option<&str> {
        self.remote_to_local.get(remote_id).map(String::as_str)
    }

    pub fn get_remote(&self, local_id: &str) -> Option<&str> {
        self.local_to_remote.get(local_id).map(String::as_str)
    }

    /// Whether `local_id` appears as a value in the remote→local table.
    pub fn contains_local(&self, local_id: &str) -> bool {
        self.local_to_remote.contains_key(local_id)
    }

    /// Store a pair in both directions.
    ///
    /// Any previous pairing of either id is dropped first so a remapped id
    /// never leaves a dangling half behind.
    pub fn put(&mut self, remote_id: &str, local_id: &str) {
        self.remove_by_remote(remote_id);
        self.remove_by_local(local_id);
        self.remote_to_local
            .insert(remote_id.to_string(), local_id.to_string());
        self.local_to_remote
            .insert(local_id.to_string(), remote_id.to_string());
    }

    /// Remove a pair by its remote id. Returns the local id it pointed to.
    pub fn remove_by_remote(&mut self, remote_id: &str) -> Option<String> {
        let local_id = self.remote_to_local.remove(remote_id)?;
        self.local_to_remote.remove(&local_id);
        Some(local_id)
    }

    /// Remove a pair by its local id. Returns the remote id it pointed to.
    pub fn remove_by_local(&mut self, local_id: &str) -> Option<String> {
        let remote_id = self.local_to_remote.remove(local_id)?;
        self.remote_to_local.remove(&remote_id);
        Some(remote_id)
    }

    /// All mapped remote ids, sorted.
    pub fn remote_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.remote_to_local.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All (remote id, local id) pairs, sorted by remote id.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .remote_to_local
            .iter()
            .map(|(r, l)| (r.clone(), l.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn counts(&self) -> MappingCounts {
        MappingCounts {
            remote_to_local: self.remote_to_local.len(),
            local_to_remote: self.local_to_remote.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.remote_to_local.is_empty()
    }

    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            remote_to_local: self
                .remote_to_local
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            local_to_remote: self
                .local_to_remote
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Rebuild the store from a snapshot.
    ///
    /// The remote→local table is authoritative; the inverse is rebuilt via
    /// `put`. Entries of the stored inverse that disagree are logged and
    /// dropped.
    pub fn restore(data: MappingSnapshot) -> Self {
        let mut store = MappingStore::new();

        for (remote_id, local_id) in &data.remote_to_local {
            store.put(remote_id, local_id);
        }

        let inconsistent = data
            .local_to_remote
            .iter()
            .filter(|(local_id, remote_id)| store.get_remote(local_id) != Some(remote_id.as_str()))
            .count();

        if inconsistent > 0 || store.remote_to_local.len() != data.remote_to_local.len() {
            warn!(
                inconsistent,
                restored = store.remote_to_local.len(),
                stored = data.remote_to_local.len(),
                "Mapping file was not a bijection, rebuilt inverse index"
            );
        }

        store
    }
}

/// Durable storage for mapping snapshots.
#[async_trait]
pub trait MappingStorage: Send + Sync {
    /// Load the last persisted snapshot. `Ok(None)` when nothing was stored yet.
    async fn load(&self) -> SyncResult<Option<MappingSnapshot>>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &MappingSnapshot) -> SyncResult<()>;
}

/// Stores the snapshot as one JSON file, replaced whole on each save.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStorage { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "mappings.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl MappingStorage for JsonFileStorage {
    async fn load(&self) -> SyncResult<Option<MappingSnapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: MappingSnapshot = serde_json::from_str(&content).map_err(|e| {
            SyncError::Persistence(format!("Corrupt mapping file {}: {e}", self.path.display()))
        })?;

        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &MappingSnapshot) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::Persistence(format!("Could not create {}: {e}", parent.display()))
            })?;
        }

        let content = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| SyncError::Persistence(format!("Could not write {}: {e}", temp.display())))?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            SyncError::Persistence(format!("Could not replace {}: {e}", self.path.display()))
        })?;

        Ok(())
    }
}
