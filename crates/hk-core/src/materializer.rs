//! Seam between the reconciler and the host's entity registry

use crate::accessory::{Accessory, Service};
use crate::ids::{PairingId, UniqueId};

/// Host-side creation and removal of entities
///
/// The reconciler only issues intents through this trait. The host assigns
/// user-facing entity ids and persists them keyed by [`UniqueId`].
/// Implementations must be idempotent: creating an entity that already exists
/// for the same unique id is a no-op.
pub trait EntityMaterializer: Send + Sync {
    fn create_entity(&self, pairing_id: &PairingId, accessory: &Accessory, service: &Service);

    fn remove_entity(&self, unique_id: &UniqueId);
}
