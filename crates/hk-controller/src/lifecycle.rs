//! Host lifecycle hooks
//!
//! The reconciler reports setup outcomes through [`SetupResult`] and asks the
//! host to reschedule or mark a pairing not ready through [`HostHooks`].

use std::time::Duration;

use hk_core::PairingId;
use tokio::sync::mpsc;
use tracing::warn;

/// Outcome of a setup or retry attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupResult {
    /// Entities are live
    Ready,
    /// No usable topology; the host owns the next attempt
    NotReady { reason: String },
    /// Cached entities stay available; the reconciler retries after the delay
    RetryAfter(Duration),
}

/// Callbacks into the hosting platform
///
/// Called from inside the device task; implementations must not block.
pub trait HostHooks: Send + Sync {
    fn mark_not_ready(&self, pairing_id: &PairingId, reason: &str);

    fn schedule_retry(&self, pairing_id: &PairingId, delay: Duration);
}

/// Hook invocation forwarded by [`ChannelHooks`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    NotReady { pairing_id: PairingId, reason: String },
    RetryScheduled { pairing_id: PairingId, delay: Duration },
}

impl HostEvent {
    pub fn pairing_id(&self) -> &PairingId {
        match self {
            HostEvent::NotReady { pairing_id, .. } => pairing_id,
            HostEvent::RetryScheduled { pairing_id, .. } => pairing_id,
        }
    }
}

/// [`HostHooks`] that forwards every call over an unbounded channel
#[derive(Clone)]
pub struct ChannelHooks {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelHooks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            warn!("Host event receiver dropped");
        }
    }
}

impl HostHooks for ChannelHooks {
    fn mark_not_ready(&self, pairing_id: &PairingId, reason: &str) {
        self.send(HostEvent::NotReady {
            pairing_id: pairing_id.clone(),
            reason: reason.to_string(),
        });
    }

    fn schedule_retry(&self, pairing_id: &PairingId, delay: Duration) {
        self.send(HostEvent::RetryScheduled {
            pairing_id: pairing_id.clone(),
            delay,
        });
    }
}
