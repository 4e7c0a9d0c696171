//! HomeKit accessory topology reconciliation
//!
//! - [`Session`]: live or cached-only connection to one pairing
//! - [`Reconciler`]: cache-first state machine that keeps a pairing's
//!   entities in line with the device
//! - [`Controller`]: one reconciler task per pairing, driven by host hooks
//!
//! Entities are served from the cached topology the moment setup starts and
//! only change when the device reports a different configuration number.

pub mod controller;
pub mod diff;
pub mod error;
pub mod file_transport;
pub mod lifecycle;
pub mod reconciler;
pub mod session;
pub mod state_machine;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use controller::Controller;
pub use diff::TopologyDiff;
pub use error::{ReconcileError, ReconcileResult, SessionError};
pub use file_transport::{accessories_from_file, AccessoryFileError, FileTransport};
pub use lifecycle::{ChannelHooks, HostEvent, HostHooks, SetupResult};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use session::{AccessoryTransport, CachedOnlySession, LiveSession, Session};
pub use state_machine::{InvalidTransition, ReconcilerState, RetryPolicy};
