//! Entity-level difference between two topologies

use std::collections::BTreeMap;

use hk_core::{EntityKey, UniqueId};

/// Entities to create and remove to move from one entity set to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub to_create: Vec<EntityKey>,
    pub to_remove: Vec<(EntityKey, UniqueId)>,
}

impl TopologyDiff {
    /// Compare what is materialized against what the target topology exposes
    pub fn between(
        current: &BTreeMap<EntityKey, UniqueId>,
        target: &BTreeMap<EntityKey, UniqueId>,
    ) -> Self {
        let to_create = target
            .keys()
            .filter(|key| !current.contains_key(key))
            .cloned()
            .collect();
        let to_remove = current
            .iter()
            .filter(|(key, _)| !target.contains_key(key))
            .map(|(key, unique_id)| (key.clone(), unique_id.clone()))
            .collect();

        Self {
            to_create,
            to_remove,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_remove.is_empty()
    }
}
