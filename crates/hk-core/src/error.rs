//! Errors raised while building or parsing accessory topology

use thiserror::Error;

/// Error type for invalid topology data
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("pairing id cannot be empty")]
    EmptyPairingId,

    #[error("accessory {aid} has no accessory information service")]
    MissingAccessoryInformation { aid: u64 },

    #[error("accessory {aid} has no serial number")]
    MissingSerialNumber { aid: u64 },

    #[error("serial number '{serial}' is used by more than one accessory")]
    DuplicateSerial { serial: String },

    #[error("accessory id {aid} is used by more than one accessory")]
    DuplicateAid { aid: u64 },

    #[error("invalid accessories document: {0}")]
    InvalidDocument(String),
}
