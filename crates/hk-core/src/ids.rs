//! Identifier types: pairing ids, config numbers and entity unique ids

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TopologyError;

/// Stable identifier of one paired physical device (usually its HAP device id)
///
/// Immutable once assigned; never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairingId(String);

impl PairingId {
    pub fn new(id: impl Into<String>) -> Result<Self, TopologyError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TopologyError::EmptyPairingId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PairingId {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PairingId {
    type Error = TopologyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PairingId> for String {
    fn from(id: PairingId) -> String {
        id.0
    }
}

impl fmt::Display for PairingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version counter of a device's advertised topology (HAP `c#`)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConfigNumber(pub u64);

impl ConfigNumber {
    pub fn value(self) -> u64 {
        self.0
    }

    /// The next config number, as a device reports after a topology change
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for ConfigNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for ConfigNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an entity within one pairing: (accessory serial, service iid)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub serial_number: String,
    pub service_id: u64,
}

impl EntityKey {
    pub fn new(serial_number: impl Into<String>, service_id: u64) -> Self {
        Self {
            serial_number: serial_number.into(),
            service_id,
        }
    }

    pub fn unique_id(&self, pairing_id: &PairingId) -> UniqueId {
        UniqueId::for_service(pairing_id, &self.serial_number, self.service_id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.serial_number, self.service_id)
    }
}

/// Registry unique id of an entity
///
/// Format: `homekit-{pairing_id}-{serial}-{service_id}`, with `%` and `-`
/// inside the pairing id and serial written as `%25` and `%2D` so distinct
/// triples never share a unique id. Depends only on the pairing and the
/// (serial, service iid) pair, never on the config number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(String);

impl UniqueId {
    pub fn for_service(pairing_id: &PairingId, serial_number: &str, service_id: u64) -> Self {
        Self(format!(
            "homekit-{}-{}-{service_id}",
            escape_part(pairing_id.as_str()),
            escape_part(serial_number)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '-' => escaped.push_str("%2D"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl From<String> for UniqueId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
