//! # Parameter Cache
//!
//! Per-vehicle store of the last complete parameter set, used for the
//! fast path: when the vehicle reports a hash equal to the cached one, the
//! engine loads from here and skips the network sweep entirely.
//!
//! ## Blob Layout
//! ```text
//! <cache dir>/vehicle-<id>.json
//! {
//!   "vehicle_id": 1,
//!   "hash": 3735928559,
//!   "saved_at": "2026-10-18T09:00:00Z",
//!   "params": [ { "component": 1, "name": "...", "value": {...} }, ... ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyparam_core::{parameter_set_hash, ComponentId, ParamValue};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ParamError, ParamResult};

// =============================================================================
// Cached Set
// =============================================================================

/// One cached parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedParam {
    pub component: ComponentId,
    pub name: String,
    pub value: ParamValue,
}

/// A complete, hash-stamped parameter set for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedParameterSet {
    pub vehicle_id: u8,
    pub hash: u32,
    pub saved_at: DateTime<Utc>,
    pub params: Vec<CachedParam>,
}

impl CachedParameterSet {
    /// Builds a set and stamps it with its hash.
    pub fn new(vehicle_id: u8, params: Vec<CachedParam>) -> Self {
        let hash = Self::compute_hash(&params);
        Self {
            vehicle_id,
            hash,
            saved_at: Utc::now(),
            params,
        }
    }

    fn compute_hash(params: &[CachedParam]) -> u32 {
        parameter_set_hash(
            params
                .iter()
                .map(|p| (p.component, p.name.as_str(), p.value)),
        )
    }

    /// Returns true when the stored hash matches the contents.
    pub fn verify(&self) -> bool {
        Self::compute_hash(&self.params) == self.hash
    }
}

// =============================================================================
// Store Trait
// =============================================================================

/// Key-value blob store for cached parameter sets, keyed by vehicle id.
///
/// `load` returns `None` for absent as well as unreadable blobs.
pub trait CacheStore: Send + Sync {
    fn load(&self, vehicle_id: u8) -> Option<CachedParameterSet>;

    fn save(&self, set: &CachedParameterSet) -> ParamResult<()>;
}

/// Store that keeps nothing. Used when caching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCacheStore;

impl CacheStore for NoCacheStore {
    fn load(&self, _vehicle_id: u8) -> Option<CachedParameterSet> {
        None
    }

    fn save(&self, _set: &CachedParameterSet) -> ParamResult<()> {
        Ok(())
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-process store, for tests and the simulator.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    sets: Mutex<HashMap<u8, CachedParameterSet>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a set is stored for the vehicle.
    pub fn contains(&self, vehicle_id: u8) -> bool {
        self.sets
            .lock()
            .map(|sets| sets.contains_key(&vehicle_id))
            .unwrap_or(false)
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, vehicle_id: u8) -> Option<CachedParameterSet> {
        self.sets.lock().ok()?.get(&vehicle_id).cloned()
    }

    fn save(&self, set: &CachedParameterSet) -> ParamResult<()> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| ParamError::CacheIo("cache mutex poisoned".into()))?;
        sets.insert(set.vehicle_id, set.clone());
        Ok(())
    }
}

// =============================================================================
// File Store
// =============================================================================

/// One JSON blob per vehicle under a directory.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the blob for a vehicle.
    pub fn path_for(&self, vehicle_id: u8) -> PathBuf {
        self.dir.join(format!("vehicle-{}.json", vehicle_id))
    }

    fn read(&self, vehicle_id: u8) -> ParamResult<Option<CachedParameterSet>> {
        let path = self.path_for(vehicle_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let set: CachedParameterSet = serde_json::from_str(&contents)?;
        Ok(Some(set))
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self, vehicle_id: u8) -> Option<CachedParameterSet> {
        match self.read(vehicle_id) {
            Ok(Some(set)) if set.verify() => {
                debug!(vehicle_id, hash = set.hash, params = set.params.len(), "Cache loaded");
                Some(set)
            }
            Ok(Some(set)) => {
                warn!(vehicle_id, hash = set.hash, "Cache contents do not match stored hash, ignoring");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(vehicle_id, error = %e, "Unreadable parameter cache, ignoring");
                None
            }
        }
    }

    fn save(&self, set: &CachedParameterSet) -> ParamResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(set.vehicle_id);
        let contents = serde_json::to_string_pretty(set)?;
        std::fs::write(&path, contents)?;
        info!(?path, hash = set.hash, params = set.params.len(), "Parameter cache saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> CachedParameterSet {
        CachedParameterSet::new(
            1,
            vec![
                CachedParam {
                    component: ComponentId(1),
                    name: "CRUISE_SPEED".into(),
                    value: ParamValue::Float(12.5),
                },
                CachedParam {
                    component: ComponentId(1),
                    name: "SYS_AUTOSTART".into(),
                    value: ParamValue::Int32(4001),
                },
            ],
        )
    }

    #[test]
    fn test_set_verifies_own_hash() {
        let mut set = sample_set();
        assert!(set.verify());

        set.params[0].value = ParamValue::Float(13.0);
        assert!(!set.verify());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCacheStore::new();
        assert!(store.load(1).is_none());

        store.save(&sample_set()).unwrap();
        assert!(store.contains(1));
        assert_eq!(store.load(1).unwrap().hash, sample_set().hash);
        assert!(store.load(2).is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("param-cache"));
        let set = sample_set();

        store.save(&set).unwrap();
        assert!(store.path_for(1).exists());
        assert_eq!(store.load(1).unwrap().params, set.params);
    }

    #[test]
    fn test_file_store_treats_corrupt_blob_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path());
        std::fs::write(store.path_for(1), "{ not json").unwrap();

        assert!(store.load(1).is_none());
    }
}
