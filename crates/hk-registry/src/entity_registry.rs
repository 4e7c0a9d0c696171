//! Entity Registry
//!
//! Tracks materialized entities with unique_id tracking, device linking,
//! and indexes for fast lookups.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hk_storage::{Storable, Storage, StorageFile, StorageResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Storage key for entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal id (ULID)
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Platform-specific unique identifier
    pub unique_id: String,
    /// Component/platform that provides this entity
    pub platform: String,
    /// Pairing that created this entity
    pub pairing_id: String,
    /// Parent device ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Platform default name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    /// Get the domain from entity_id
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    /// Get the object_id from entity_id
    pub fn object_id(&self) -> &str {
        self.entity_id.split('.').nth(1).unwrap_or(&self.entity_id)
    }
}

/// Fields for a new registry entry
#[derive(Debug, Clone)]
pub struct NewEntity<'a> {
    pub domain: &'a str,
    pub suggested_object_id: &'a str,
    pub unique_id: &'a str,
    pub platform: &'a str,
    pub pairing_id: &'a str,
    pub device_id: Option<&'a str>,
    pub original_name: Option<&'a str>,
}

/// Entity registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Slugify a name for use as an object id
fn slugify(name: &str) -> String {
    let mut result = String::new();
    for c in name.chars() {
        if c.is_alphanumeric() {
            result.extend(c.to_lowercase());
        } else if !result.is_empty() && !result.ends_with('_') {
            result.push('_');
        }
    }
    result.trim_end_matches('_').to_string()
}

/// Entity Registry with multi-index support
///
/// Provides lookups by:
/// - entity_id (primary)
/// - unique_id
/// - device_id (multi)
/// - pairing_id (multi)
pub struct EntityRegistry {
    storage: Arc<Storage>,

    /// Primary index: entity_id -> EntityEntry, in insertion order
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: unique_id -> entity_id
    by_unique_id: DashMap<String, String>,

    /// Index: device_id -> set of entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    /// Index: pairing_id -> set of entity_ids
    by_pairing_id: DashMap<String, HashSet<String>>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
            by_device_id: DashMap::new(),
            by_pairing_id: DashMap::new(),
        }
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load::<EntityRegistryData>(STORAGE_KEY).await? {
            info!(
                "Loading {} entities from storage (v{}.{})",
                storage_file.data.entities.len(),
                storage_file.version,
                storage_file.minor_version
            );

            for entry in storage_file.data.entities {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let entities: Vec<EntityEntry> = self
            .by_entity_id
            .read()
            .map(|e| e.values().map(|v| (**v).clone()).collect())
            .unwrap_or_default();
        let count = entities.len();

        let storage_file = StorageFile::new(
            STORAGE_KEY,
            EntityRegistryData { entities },
            STORAGE_VERSION,
            STORAGE_MINOR_VERSION,
        );

        self.storage.save(&storage_file).await?;
        debug!("Saved {} entities to storage", count);
        Ok(())
    }

    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        self.by_unique_id
            .insert(entry.unique_id.clone(), entity_id.clone());

        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        self.by_pairing_id
            .entry(entry.pairing_id.clone())
            .or_default()
            .insert(entity_id.clone());

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    fn unindex_entry(&self, entry: &EntityEntry) {
        let entity_id = &entry.entity_id;

        self.by_unique_id.remove(&entry.unique_id);

        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(entity_id);
            }
        }

        if let Some(mut ids) = self.by_pairing_id.get_mut(&entry.pairing_id) {
            ids.remove(entity_id);
        }
    }

    /// Get an entity by entity_id
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Get an entity by unique_id
    pub fn get_by_unique_id(&self, unique_id: &str) -> Option<Arc<EntityEntry>> {
        let entity_id = self.by_unique_id.get(unique_id)?.value().clone();
        self.get(&entity_id)
    }

    /// Entities created for a pairing
    pub fn get_by_pairing_id(&self, pairing_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_pairing_id
            .get(pairing_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Entities attached to a device
    pub fn get_by_device_id(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        self.by_device_id
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Pick a free entity id for `domain.suggested_object_id`
    ///
    /// Appends `_2`, `_3`, ... on collision.
    pub fn generate_entity_id(&self, domain: &str, suggested_object_id: &str) -> String {
        let object_id = match slugify(suggested_object_id) {
            slug if slug.is_empty() => "unnamed_device".to_string(),
            slug => slug,
        };

        let base = format!("{domain}.{object_id}");
        let mut candidate = base.clone();
        let mut suffix = 2;
        while self.get(&candidate).is_some() {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        candidate
    }

    /// Get the entity for `unique_id`, or register a new one
    pub fn get_or_create(&self, new: NewEntity<'_>) -> Arc<EntityEntry> {
        if let Some(existing) = self.get_by_unique_id(new.unique_id) {
            debug!("Found existing entity by unique_id: {}", existing.entity_id);
            return existing;
        }

        let now = Utc::now();
        let entry = Arc::new(EntityEntry {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: self.generate_entity_id(new.domain, new.suggested_object_id),
            unique_id: new.unique_id.to_string(),
            platform: new.platform.to_string(),
            pairing_id: new.pairing_id.to_string(),
            device_id: new.device_id.map(String::from),
            original_name: new.original_name.map(String::from),
            created_at: now,
            modified_at: now,
        });

        self.index_entry(Arc::clone(&entry));
        info!("Registered entity: {} ({})", entry.entity_id, entry.unique_id);
        entry
    }

    /// Remove an entity by entity_id
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id))?;

        self.unindex_entry(&entry);
        info!("Removed entity: {}", entity_id);
        Some(entry)
    }

    /// Remove an entity by unique_id
    pub fn remove_by_unique_id(&self, unique_id: &str) -> Option<Arc<EntityEntry>> {
        let entity_id = self.by_unique_id.get(unique_id)?.value().clone();
        self.remove(&entity_id)
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.by_entity_id
            .read()
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
