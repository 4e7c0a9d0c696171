//! Error types for sessions and reconciliation

use hk_core::{PairingId, TopologyError};
use hk_storage::AccessoryStoreError;
use thiserror::Error;

use crate::state_machine::{InvalidTransition, ReconcilerState};

/// Failure reported by a pairing session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Pairing credentials rejected; permanent until the user re-pairs
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Device could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection dropped during a request
    #[error("accessory disconnected: {0}")]
    Disconnected(String),

    /// Device answered with a topology that violates pairing invariants
    #[error("device reported invalid topology: {0}")]
    InvalidTopology(#[from] TopologyError),
}

impl SessionError {
    /// Transient failures are retried; authentication failures never are
    pub fn is_transient(&self) -> bool {
        !matches!(self, SessionError::Auth(_))
    }
}

/// Errors surfaced by the reconciler and controller
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("authentication failed for {pairing_id}: {reason}")]
    Auth { pairing_id: PairingId, reason: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("{pairing_id} is already set up (state {state:?})")]
    AlreadySetUp {
        pairing_id: PairingId,
        state: ReconcilerState,
    },

    #[error("session belongs to {found}, expected {expected}")]
    PairingMismatch {
        expected: PairingId,
        found: PairingId,
    },

    #[error("{0} is already registered")]
    AlreadyRegistered(PairingId),

    #[error("unknown pairing: {0}")]
    UnknownPairing(PairingId),

    #[error("{pairing_id} was unloaded before the operation finished")]
    Cancelled { pairing_id: PairingId },

    #[error(transparent)]
    Store(#[from] AccessoryStoreError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
