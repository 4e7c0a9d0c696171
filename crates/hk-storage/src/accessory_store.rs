//! Accessory Store
//!
//! Persisted cache of the last known topology of every pairing, kept in the
//! `homekit_controller-entity-map` storage document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 1,
//!   "key": "homekit_controller-entity-map",
//!   "data": {
//!     "pairings": {
//!       "00:00:00:00:00:00": { "config_num": 1, "accessories": [ ... ] }
//!     }
//!   }
//! }
//! ```
//!
//! The document is read once at [`AccessoryStore::open`]; lookups are served
//! from memory. An unknown major version or an unreadable entry is treated as a
//! cache miss, never as a fatal error.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use hk_core::{Accessory, ConfigNumber, PairingId, TopologySnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::storage::{Storable, Storage, StorageError};

/// Storage key for the accessory topology cache
pub const STORAGE_KEY: &str = "homekit_controller-entity-map";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// Accessory store errors
#[derive(Debug, Error)]
pub enum AccessoryStoreError {
    /// A cached entry could not be parsed; callers treat it as a miss
    #[error("cache entry for {pairing_id} is corrupt: {reason}")]
    CacheCorrupt { pairing_id: String, reason: String },

    /// The entity map could not be written
    #[error("failed to persist entity map: {0}")]
    StoreWrite(#[from] StorageError),
}

/// Persisted value for one pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingCacheEntry {
    pub config_num: ConfigNumber,
    pub accessories: Vec<Accessory>,
}

impl From<&TopologySnapshot> for PairingCacheEntry {
    fn from(snapshot: &TopologySnapshot) -> Self {
        Self {
            config_num: snapshot.config_num(),
            accessories: snapshot.accessories().to_vec(),
        }
    }
}

/// Entity map document body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMapData {
    pub pairings: BTreeMap<String, PairingCacheEntry>,
}

impl Storable for EntityMapData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Persisted pairing → topology cache
///
/// The in-memory map changes synchronously, before any await, so a caller
/// cancelled mid-save still leaves its snapshot in place for the next flush.
/// The only shared critical section is the document write itself.
pub struct AccessoryStore {
    storage: Arc<Storage>,

    /// Active snapshot per pairing
    snapshots: DashMap<PairingId, Arc<TopologySnapshot>>,

    /// Guards the document write
    flush_lock: Mutex<()>,
}

impl AccessoryStore {
    /// Create an empty store without reading storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            snapshots: DashMap::new(),
            flush_lock: Mutex::new(()),
        }
    }

    /// Open the store, loading whatever part of the cache is readable
    pub async fn open(storage: Arc<Storage>) -> Self {
        let store = Self::new(storage);
        match store.storage.load_raw(STORAGE_KEY).await {
            Ok(Some(raw)) => store.restore(raw),
            Ok(None) => debug!("No cached entity map, starting cold"),
            Err(e) => warn!(error = %e, "Entity map unreadable, starting cold"),
        }
        store
    }

    fn restore(&self, raw: Value) {
        let version = raw.get("version").and_then(Value::as_u64);
        if version != Some(u64::from(STORAGE_VERSION)) {
            warn!(
                ?version,
                expected = STORAGE_VERSION,
                "Unknown entity map version, ignoring cache"
            );
            return;
        }

        let Some(pairings) = raw.pointer("/data/pairings").and_then(Value::as_object) else {
            warn!("Entity map has no pairings table, ignoring cache");
            return;
        };

        for (pairing_id, entry) in pairings {
            match parse_entry(pairing_id, entry.clone()) {
                Ok(snapshot) => {
                    self.snapshots
                        .insert(snapshot.pairing_id().clone(), Arc::new(snapshot));
                }
                Err(e) => warn!(error = %e, "Ignoring cached entity map entry"),
            }
        }

        info!(
            "Loaded {} cached pairings from entity map",
            self.snapshots.len()
        );
    }

    /// Last persisted snapshot for a pairing
    ///
    /// Served from memory; never blocks.
    pub fn load(&self, pairing_id: &PairingId) -> Option<Arc<TopologySnapshot>> {
        self.snapshots.get(pairing_id).map(|r| Arc::clone(r.value()))
    }

    /// Replace the entry for `snapshot.pairing_id()` and persist it
    ///
    /// On a write failure, or if the returned future is dropped early, the
    /// new snapshot stays in memory and is written by the next flush.
    pub async fn save(
        &self,
        snapshot: Arc<TopologySnapshot>,
    ) -> Result<(), AccessoryStoreError> {
        let pairing_id = snapshot.pairing_id().clone();
        let config_num = snapshot.config_num();
        self.snapshots.insert(pairing_id.clone(), snapshot);
        self.flush().await?;

        debug!(pairing_id = %pairing_id, config_num = %config_num, "Saved accessory topology");
        Ok(())
    }

    /// Forget a pairing (after it has been unpaired)
    pub async fn remove(&self, pairing_id: &PairingId) -> Result<bool, AccessoryStoreError> {
        if self.snapshots.remove(pairing_id).is_none() {
            return Ok(false);
        }
        self.flush().await?;

        info!(pairing_id = %pairing_id, "Removed cached accessory topology");
        Ok(true)
    }

    pub fn pairing_ids(&self) -> Vec<PairingId> {
        self.snapshots.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    async fn flush(&self) -> Result<(), AccessoryStoreError> {
        let _guard = self.flush_lock.lock().await;

        let data = EntityMapData {
            pairings: self
                .snapshots
                .iter()
                .map(|r| (r.key().to_string(), PairingCacheEntry::from(r.value().as_ref())))
                .collect(),
        };

        self.storage.save(&data.to_storage_file()).await?;
        Ok(())
    }
}

fn parse_entry(pairing_id: &str, value: Value) -> Result<TopologySnapshot, AccessoryStoreError> {
    let corrupt = |reason: String| AccessoryStoreError::CacheCorrupt {
        pairing_id: pairing_id.to_string(),
        reason,
    };

    let id = PairingId::new(pairing_id).map_err(|e| corrupt(e.to_string()))?;
    let entry: PairingCacheEntry =
        serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
    TopologySnapshot::new(id, entry.config_num, entry.accessories)
        .map_err(|e| corrupt(e.to_string()))
}
