//! Pairing sessions
//!
//! A [`Session`] is either live (backed by an [`AccessoryTransport`]) or
//! cached-only, for pairings whose transport is unavailable. Sessions never
//! retry on their own; retries are the reconciler's job.

use std::sync::Arc;

use async_trait::async_trait;
use hk_core::{Accessory, ConfigNumber, PairingId, TopologySnapshot};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::SessionError;

/// Wire-level access to a paired accessory (IP, BLE, ...)
#[async_trait]
pub trait AccessoryTransport: Send + Sync {
    /// Establish a secure session
    async fn open(&self) -> Result<(), SessionError>;

    /// Read the full accessory database along with its configuration number
    async fn list_accessories(&self) -> Result<(ConfigNumber, Vec<Accessory>), SessionError>;

    /// Tear down the secure session
    async fn close(&self) -> Result<(), SessionError>;

    /// Configuration-number change notifications, if the transport pushes them
    fn subscribe(&self) -> Option<broadcast::Receiver<ConfigNumber>> {
        None
    }
}

/// Session backed by a transport
pub struct LiveSession {
    pairing_id: PairingId,
    transport: Arc<dyn AccessoryTransport>,
    connected: bool,
}

impl LiveSession {
    pub fn new(pairing_id: PairingId, transport: Arc<dyn AccessoryTransport>) -> Self {
        Self {
            pairing_id,
            transport,
            connected: false,
        }
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        if self.connected {
            return Ok(());
        }
        self.transport.open().await?;
        self.connected = true;
        debug!(pairing_id = %self.pairing_id, "Session connected");
        Ok(())
    }

    async fn list(&mut self) -> Result<TopologySnapshot, SessionError> {
        if !self.connected {
            return Err(SessionError::Disconnected("session is not connected".into()));
        }

        match self.transport.list_accessories().await {
            Ok((config_num, accessories)) => Ok(TopologySnapshot::new(
                self.pairing_id.clone(),
                config_num,
                accessories,
            )?),
            Err(e) => {
                if matches!(e, SessionError::Disconnected(_)) {
                    self.connected = false;
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.transport.close().await
    }
}

/// Session for a pairing with no usable transport
///
/// Connecting always fails with a transient error, so a reconciler backed by
/// one serves the cached topology and keeps retrying.
pub struct CachedOnlySession {
    pairing_id: PairingId,
}

impl CachedOnlySession {
    pub fn new(pairing_id: PairingId) -> Self {
        Self { pairing_id }
    }
}

/// Connection to one paired accessory
pub enum Session {
    Live(LiveSession),
    CachedOnly(CachedOnlySession),
}

impl Session {
    pub fn live(pairing_id: PairingId, transport: Arc<dyn AccessoryTransport>) -> Self {
        Session::Live(LiveSession::new(pairing_id, transport))
    }

    pub fn cached_only(pairing_id: PairingId) -> Self {
        Session::CachedOnly(CachedOnlySession::new(pairing_id))
    }

    pub fn pairing_id(&self) -> &PairingId {
        match self {
            Session::Live(s) => &s.pairing_id,
            Session::CachedOnly(s) => &s.pairing_id,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Session::Live(_))
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Session::Live(s) => s.connected,
            Session::CachedOnly(_) => false,
        }
    }

    /// Open the session; a no-op when already connected
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        match self {
            Session::Live(s) => s.connect().await,
            Session::CachedOnly(s) => Err(SessionError::Connection(format!(
                "no transport available for {}",
                s.pairing_id
            ))),
        }
    }

    /// Fetch the device's current topology
    pub async fn list_accessories_and_services(&mut self) -> Result<TopologySnapshot, SessionError> {
        match self {
            Session::Live(s) => s.list().await,
            Session::CachedOnly(_) => Err(SessionError::Disconnected(
                "cached-only session cannot list accessories".into(),
            )),
        }
    }

    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        match self {
            Session::Live(s) => s.disconnect().await,
            Session::CachedOnly(_) => Ok(()),
        }
    }

    /// Disconnect, logging instead of returning failures
    pub async fn close_quietly(&mut self) {
        if let Err(e) = self.disconnect().await {
            warn!(pairing_id = %self.pairing_id(), error = %e, "Error while disconnecting");
        }
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<ConfigNumber>> {
        match self {
            Session::Live(s) => s.transport.subscribe(),
            Session::CachedOnly(_) => None,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pairing_id", self.pairing_id())
            .field("live", &self.is_live())
            .field("connected", &self.is_connected())
            .finish()
    }
}
