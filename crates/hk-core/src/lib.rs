//! Core types for HomeKit accessory topology
//!
//! This crate provides the fundamental types shared by the store, the
//! registries and the reconciler: [`PairingId`], [`ConfigNumber`],
//! [`Accessory`], [`Service`], [`TopologySnapshot`] and the
//! [`EntityMaterializer`] seam through which entities are created and removed.

mod accessory;
mod error;
mod ids;
mod materializer;
mod service_type;
mod snapshot;

pub use accessory::{
    parse_accessories, Accessory, AccessoryBuilder, Characteristic, Service,
};
pub use error::TopologyError;
pub use ids::{ConfigNumber, EntityKey, PairingId, UniqueId};
pub use materializer::EntityMaterializer;
pub use service_type::{normalize_hap_type, ServiceType};
pub use snapshot::{EntityRecord, TopologySnapshot};

/// Platform name used for registry entries created from HomeKit accessories
pub const PLATFORM: &str = "homekit_controller";

/// Accessory id of the root (bridge) accessory of a pairing
pub const ROOT_AID: u64 = 1;

/// Well-known HAP characteristic types (short form)
pub mod characteristics {
    pub const IDENTIFY: &str = "14";
    pub const MANUFACTURER: &str = "20";
    pub const MODEL: &str = "21";
    pub const NAME: &str = "23";
    pub const SERIAL_NUMBER: &str = "30";
    pub const FIRMWARE_REVISION: &str = "52";
    pub const HARDWARE_REVISION: &str = "53";

    pub const CURRENT_HEATING_COOLING: &str = "F";
    pub const CURRENT_TEMPERATURE: &str = "11";
    pub const TARGET_HEATING_COOLING: &str = "33";
    pub const TARGET_TEMPERATURE: &str = "35";
    pub const OCCUPANCY_DETECTED: &str = "71";
    pub const MOTION_DETECTED: &str = "22";
    pub const ON: &str = "25";
}
