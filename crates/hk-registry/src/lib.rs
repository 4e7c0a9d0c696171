//! HomeKit entity and device registries
//!
//! This crate provides the host-side registries that accessory topology is
//! materialized into:
//! - Entities (EntityRegistry)
//! - Devices (DeviceRegistry)
//!
//! [`Registries`] bundles both and implements
//! [`hk_core::EntityMaterializer`], so a reconciler can create and remove
//! entities without knowing how they are stored.

pub mod device_registry;
pub mod entity_registry;

pub use device_registry::{DeviceEntry, DeviceIdentifier, DeviceRegistry, DeviceRegistryData};
pub use entity_registry::{EntityEntry, EntityRegistry, EntityRegistryData, NewEntity};

use std::sync::Arc;

use hk_core::{Accessory, EntityMaterializer, PairingId, Service, UniqueId, PLATFORM};
use hk_storage::{Storage, StorageResult};
use tracing::debug;

/// All registries bundled together
pub struct Registries {
    pub storage: Arc<Storage>,
    pub entities: EntityRegistry,
    pub devices: DeviceRegistry,
}

impl Registries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            entities: EntityRegistry::new(storage.clone()),
            devices: DeviceRegistry::new(storage.clone()),
            storage,
        }
    }

    /// Load all registries from storage
    pub async fn load_all(&self) -> StorageResult<()> {
        self.entities.load().await?;
        self.devices.load().await?;
        Ok(())
    }

    /// Save all registries to storage
    pub async fn save_all(&self) -> StorageResult<()> {
        self.entities.save().await?;
        self.devices.save().await?;
        Ok(())
    }
}

impl EntityMaterializer for Registries {
    fn create_entity(&self, pairing_id: &PairingId, accessory: &Accessory, service: &Service) {
        let Some(domain) = service.service_type.platform() else {
            debug!(
                serial = %accessory.serial_number,
                iid = service.iid,
                "Service is not exposed as an entity"
            );
            return;
        };

        let device = self.devices.get_or_create(pairing_id, accessory);
        let unique_id = UniqueId::for_service(pairing_id, &accessory.serial_number, service.iid);
        let pairing = pairing_id.to_string();

        self.entities.get_or_create(NewEntity {
            domain,
            suggested_object_id: &accessory.name,
            unique_id: unique_id.as_str(),
            platform: PLATFORM,
            pairing_id: &pairing,
            device_id: Some(device.id.as_str()),
            original_name: Some(accessory.name.as_str()),
        });
    }

    fn remove_entity(&self, unique_id: &UniqueId) {
        let Some(entry) = self.entities.remove_by_unique_id(unique_id.as_str()) else {
            debug!(unique_id = %unique_id, "Entity already removed");
            return;
        };

        // Drop the device once its last entity is gone
        if let Some(device_id) = entry.device_id.as_deref() {
            if self.entities.get_by_device_id(device_id).is_empty() {
                self.devices.remove(device_id);
            }
        }
    }
}
