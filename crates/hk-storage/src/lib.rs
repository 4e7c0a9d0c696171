//! HomeKit storage
//!
//! This crate provides:
//! - [`Storage`] - versioned JSON documents in the `.storage/` directory
//! - [`AccessoryStore`] - the persisted pairing → topology cache
//!
//! The accessory store survives restarts so that entities can be restored
//! from cache before a device is reachable.

pub mod accessory_store;
pub mod storage;

pub use accessory_store::{
    AccessoryStore, AccessoryStoreError, EntityMapData, PairingCacheEntry, STORAGE_KEY,
    STORAGE_MINOR_VERSION, STORAGE_VERSION,
};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
