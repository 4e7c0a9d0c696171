//! Device Registry
//!
//! One device per paired accessory. Accessories behind a bridge link to the
//! bridge (root accessory) through `via_device_id`.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hk_core::{Accessory, PairingId, PLATFORM, ROOT_AID};
use hk_storage::{Storable, Storage, StorageFile, StorageResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Storage key for device registry
pub const STORAGE_KEY: &str = "core.device_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 1;

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    /// Identifier of the accessory `aid` within a pairing
    pub fn accessory(pairing_id: &PairingId, aid: u64) -> Self {
        Self::new(PLATFORM, format!("{pairing_id}:aid:{aid}"))
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    /// Create a key for indexing
    pub fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// A registered device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal id (ULID)
    pub id: String,
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,
    /// Pairing that owns this device
    pub pairing_id: String,
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub sw_version: String,
    #[serde(default)]
    pub hw_version: String,
    pub serial_number: String,
    /// Parent (bridge) device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_device_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    fn from_accessory(
        pairing_id: &PairingId,
        accessory: &Accessory,
        via_device_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            identifiers: vec![DeviceIdentifier::accessory(pairing_id, accessory.aid)],
            pairing_id: pairing_id.to_string(),
            name: accessory.name.clone(),
            model: accessory.model.clone(),
            manufacturer: accessory.manufacturer.clone(),
            sw_version: accessory.software_version.clone(),
            hw_version: accessory.hardware_version.clone(),
            serial_number: accessory.serial_number.clone(),
            via_device_id,
            created_at: now,
            modified_at: now,
        }
    }

    /// True if the descriptive fields differ from `accessory`
    fn is_stale(&self, accessory: &Accessory) -> bool {
        self.name != accessory.name
            || self.model != accessory.model
            || self.manufacturer != accessory.manufacturer
            || self.sw_version != accessory.software_version
            || self.hw_version != accessory.hardware_version
            || self.serial_number != accessory.serial_number
    }
}

/// Device registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    pub devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device Registry with multi-index support
pub struct DeviceRegistry {
    storage: Arc<Storage>,

    /// Primary index: device_id -> DeviceEntry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier key -> device_id
    by_identifier: DashMap<String, String>,

    /// Index: pairing_id -> set of device_ids
    by_pairing_id: DashMap<String, HashSet<String>>,

    /// Index: via_device_id -> set of device_ids (child devices)
    by_via_device_id: DashMap<String, HashSet<String>>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_pairing_id: DashMap::new(),
            by_via_device_id: DashMap::new(),
        }
    }

    /// Load from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(storage_file) = self.storage.load::<DeviceRegistryData>(STORAGE_KEY).await? {
            info!(
                "Loading {} devices from storage (v{}.{})",
                storage_file.data.devices.len(),
                storage_file.version,
                storage_file.minor_version
            );

            for entry in storage_file.data.devices {
                self.index_entry(Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save to storage
    pub async fn save(&self) -> StorageResult<()> {
        let mut devices: Vec<DeviceEntry> =
            self.by_id.iter().map(|r| (**r.value()).clone()).collect();
        devices.sort_by_key(|d| d.created_at);

        let storage_file = StorageFile::new(
            STORAGE_KEY,
            DeviceRegistryData { devices },
            STORAGE_VERSION,
            STORAGE_MINOR_VERSION,
        );

        self.storage.save(&storage_file).await?;
        debug!("Saved {} devices to storage", self.by_id.len());
        Ok(())
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier.insert(identifier.key(), device_id.clone());
        }

        self.by_pairing_id
            .entry(entry.pairing_id.clone())
            .or_default()
            .insert(device_id.clone());

        if let Some(ref via) = entry.via_device_id {
            self.by_via_device_id
                .entry(via.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }

        if let Some(mut ids) = self.by_pairing_id.get_mut(&entry.pairing_id) {
            ids.remove(&entry.id);
        }

        if let Some(ref via) = entry.via_device_id {
            if let Some(mut ids) = self.by_via_device_id.get_mut(via) {
                ids.remove(&entry.id);
            }
        }

        self.by_id.remove(&entry.id);
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    pub fn get_by_identifier(&self, identifier: &DeviceIdentifier) -> Option<Arc<DeviceEntry>> {
        let device_id = self.by_identifier.get(&identifier.key())?.value().clone();
        self.get(&device_id)
    }

    /// Devices registered for a pairing
    pub fn get_by_pairing_id(&self, pairing_id: &PairingId) -> Vec<Arc<DeviceEntry>> {
        self.by_pairing_id
            .get(pairing_id.as_str())
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Child devices linked via `device_id`
    pub fn get_children(&self, device_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_via_device_id
            .get(device_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get or create the device for an accessory, refreshing stale info
    pub fn get_or_create(&self, pairing_id: &PairingId, accessory: &Accessory) -> Arc<DeviceEntry> {
        let identifier = DeviceIdentifier::accessory(pairing_id, accessory.aid);

        if let Some(existing) = self.get_by_identifier(&identifier) {
            if !existing.is_stale(accessory) {
                return existing;
            }

            let mut refreshed = (*existing).clone();
            refreshed.name = accessory.name.clone();
            refreshed.model = accessory.model.clone();
            refreshed.manufacturer = accessory.manufacturer.clone();
            refreshed.sw_version = accessory.software_version.clone();
            refreshed.hw_version = accessory.hardware_version.clone();
            refreshed.serial_number = accessory.serial_number.clone();
            refreshed.modified_at = Utc::now();

            let refreshed = Arc::new(refreshed);
            self.unindex_entry(&existing);
            self.index_entry(Arc::clone(&refreshed));
            debug!(device_id = %refreshed.id, "Refreshed device info");
            return refreshed;
        }

        let via_device_id = if accessory.is_root() {
            None
        } else {
            self.get_by_identifier(&DeviceIdentifier::accessory(pairing_id, ROOT_AID))
                .map(|root| root.id.clone())
        };

        let entry = Arc::new(DeviceEntry::from_accessory(
            pairing_id,
            accessory,
            via_device_id,
        ));
        self.index_entry(Arc::clone(&entry));
        info!("Registered device: {} ({})", entry.name, entry.id);
        entry
    }

    /// Remove a device, detaching its children
    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let entry = self.get(device_id)?;
        self.unindex_entry(&entry);

        for child in self.get_children(device_id) {
            let mut detached = (*child).clone();
            detached.via_device_id = None;
            detached.modified_at = Utc::now();
            self.unindex_entry(&child);
            self.index_entry(Arc::new(detached));
        }
        self.by_via_device_id.remove(device_id);

        info!("Removed device: {} ({})", entry.name, device_id);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hk_core::{Service, ServiceType};
    use tempfile::TempDir;

    fn registry() -> (TempDir, DeviceRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = DeviceRegistry::new(Arc::new(Storage::new(dir.path())));
        (dir, registry)
    }

    fn accessory(aid: u64, serial: &str, name: &str, sw: &str) -> Accessory {
        Accessory::builder(aid, serial)
            .name(name)
            .manufacturer("ecobee Inc.")
            .software_version(sw)
            .service(Service::new(56, ServiceType::OccupancySensor))
            .build()
            .unwrap()
    }

    fn pairing() -> PairingId {
        PairingId::new("00:00:00:00:00:00").unwrap()
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (_dir, registry) = registry();
        let root = accessory(1, "123456789012", "HomeW", "4.2.394");

        let first = registry.get_or_create(&pairing(), &root);
        let second = registry.get_or_create(&pairing(), &root);
        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sub_accessory_links_to_bridge() {
        let (_dir, registry) = registry();
        let root = registry.get_or_create(&pairing(), &accessory(1, "123456789012", "HomeW", "4.2.394"));
        let kitchen = registry.get_or_create(&pairing(), &accessory(2, "AB1C", "Kitchen", "1.0.0"));

        assert_eq!(kitchen.via_device_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(registry.get_children(&root.id).len(), 1);
        assert!(root.via_device_id.is_none());
    }

    #[test]
    fn test_stale_info_refreshed_in_place() {
        let (_dir, registry) = registry();
        let before = registry.get_or_create(&pairing(), &accessory(1, "123456789012", "HomeW", "4.2.394"));
        let after = registry.get_or_create(&pairing(), &accessory(1, "123456789012", "HomeW", "4.3.0"));

        assert_eq!(before.id, after.id);
        assert_eq!(after.sw_version, "4.3.0");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_detaches_children() {
        let (_dir, registry) = registry();
        let root = registry.get_or_create(&pairing(), &accessory(1, "123456789012", "HomeW", "4.2.394"));
        let kitchen = registry.get_or_create(&pairing(), &accessory(2, "AB1C", "Kitchen", "1.0.0"));

        registry.remove(&root.id).unwrap();
        let kitchen = registry.get(&kitchen.id).unwrap();
        assert!(kitchen.via_device_id.is_none());
        assert_eq!(registry.get_by_pairing_id(&pairing()).len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));

        let registry = DeviceRegistry::new(storage.clone());
        let root = registry.get_or_create(&pairing(), &accessory(1, "123456789012", "HomeW", "4.2.394"));
        registry.save().await.unwrap();

        let reloaded = DeviceRegistry::new(storage);
        reloaded.load().await.unwrap();
        let found = reloaded
            .get_by_identifier(&DeviceIdentifier::accessory(&pairing(), 1))
            .unwrap();
        assert_eq!(found.id, root.id);
        assert_eq!(found.manufacturer, "ecobee Inc.");
    }
}
