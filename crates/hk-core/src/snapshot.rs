//! Topology snapshots and the entity records derived from them

use std::collections::{BTreeMap, HashSet};

use crate::accessory::{Accessory, Service};
use crate::error::TopologyError;
use crate::ids::{ConfigNumber, EntityKey, PairingId, UniqueId};

/// Full accessory topology of one pairing at one config number
///
/// Immutable: a newer snapshot replaces an older one wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologySnapshot {
    pairing_id: PairingId,
    config_num: ConfigNumber,
    accessories: Vec<Accessory>,
}

impl TopologySnapshot {
    /// Create a snapshot, rejecting duplicate serial numbers or accessory ids
    pub fn new(
        pairing_id: PairingId,
        config_num: ConfigNumber,
        accessories: Vec<Accessory>,
    ) -> Result<Self, TopologyError> {
        let mut serials = HashSet::new();
        let mut aids = HashSet::new();
        for accessory in &accessories {
            if !serials.insert(accessory.serial_number.as_str()) {
                return Err(TopologyError::DuplicateSerial {
                    serial: accessory.serial_number.clone(),
                });
            }
            if !aids.insert(accessory.aid) {
                return Err(TopologyError::DuplicateAid { aid: accessory.aid });
            }
        }

        Ok(Self {
            pairing_id,
            config_num,
            accessories,
        })
    }

    pub fn pairing_id(&self) -> &PairingId {
        &self.pairing_id
    }

    pub fn config_num(&self) -> ConfigNumber {
        self.config_num
    }

    pub fn accessories(&self) -> &[Accessory] {
        &self.accessories
    }

    pub fn accessory_by_serial(&self, serial_number: &str) -> Option<&Accessory> {
        self.accessories
            .iter()
            .find(|a| a.serial_number == serial_number)
    }

    /// Resolve an entity key back to its accessory and service
    pub fn resolve(&self, key: &EntityKey) -> Option<(&Accessory, &Service)> {
        let accessory = self.accessory_by_serial(&key.serial_number)?;
        let service = accessory.service(key.service_id)?;
        service
            .service_type
            .is_exposed()
            .then_some((accessory, service))
    }

    /// One record per exposed (accessory, service) pair, in topology order
    pub fn entity_records(&self) -> Vec<EntityRecord> {
        self.accessories
            .iter()
            .flat_map(|accessory| {
                accessory.exposed_services().map(move |service| {
                    EntityRecord::new(&self.pairing_id, accessory, service)
                })
            })
            .collect()
    }

    /// Exposed entity keys with their unique ids
    pub fn entity_keys(&self) -> BTreeMap<EntityKey, UniqueId> {
        self.entity_records()
            .into_iter()
            .map(|record| (record.key, record.unique_id))
            .collect()
    }
}

/// An entity derived from one exposed service; never stored on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub unique_id: UniqueId,
    pub key: EntityKey,
    pub aid: u64,
    pub platform: &'static str,
    pub name: String,
}

impl EntityRecord {
    /// Derive the record for `service` of `accessory`
    ///
    /// Returns a record for unexposed services too; their platform is empty.
    pub fn new(pairing_id: &PairingId, accessory: &Accessory, service: &Service) -> Self {
        let key = EntityKey::new(accessory.serial_number.clone(), service.iid);
        Self {
            unique_id: key.unique_id(pairing_id),
            key,
            aid: accessory.aid,
            platform: service.service_type.platform().unwrap_or_default(),
            name: accessory.name.clone(),
        }
    }
}
