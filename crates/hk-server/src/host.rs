//! Host side of the lifecycle hooks
//!
//! Turns `schedule_retry` requests into timers that call back into the
//! controller, and re-runs setup for pairings that came up not ready.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hk_controller::{Controller, HostEvent, ReconcileError, SetupResult};
use hk_core::PairingId;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct Host {
    controller: Arc<Controller>,
    setup_retry: Duration,
    timers: JoinSet<()>,
}

impl Host {
    pub fn new(controller: Arc<Controller>, setup_retry: Duration) -> Self {
        Self {
            controller,
            setup_retry,
            timers: JoinSet::new(),
        }
    }

    /// Set up a pairing in the background, trying again every
    /// `setup_retry` while it reports not ready
    pub fn start_setup(&mut self, pairing_id: PairingId) {
        let controller = self.controller.clone();
        let setup_retry = self.setup_retry;

        self.timers.spawn(async move {
            loop {
                match controller.on_setup(&pairing_id).await {
                    Ok(SetupResult::Ready) => {
                        info!(pairing_id = %pairing_id, "Pairing ready");
                        return;
                    }
                    Ok(SetupResult::RetryAfter(delay)) => {
                        info!(pairing_id = %pairing_id, "Serving cached entities, live retry in {:?}", delay);
                        return;
                    }
                    Ok(SetupResult::NotReady { reason }) => {
                        warn!(pairing_id = %pairing_id, reason = %reason, "Pairing not ready, setting up again in {:?}", setup_retry);
                        tokio::time::sleep(setup_retry).await;
                    }
                    Err(ReconcileError::Auth { reason, .. }) => {
                        error!(pairing_id = %pairing_id, reason = %reason, "Pairing must be re-paired");
                        return;
                    }
                    Err(e) => {
                        debug!(pairing_id = %pairing_id, error = %e, "Setup abandoned");
                        return;
                    }
                }
            }
        });
    }

    fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::RetryScheduled { pairing_id, delay } => {
                debug!(pairing_id = %pairing_id, "Retry timer armed for {:?}", delay);
                let controller = self.controller.clone();
                self.timers.spawn(async move {
                    tokio::time::sleep(delay).await;
                    match controller.on_timer_fire(&pairing_id).await {
                        Ok(SetupResult::Ready) => info!(pairing_id = %pairing_id, "Pairing back online"),
                        Ok(_) => {}
                        Err(ReconcileError::UnknownPairing(_)) => {
                            debug!(pairing_id = %pairing_id, "Retry timer fired after unload")
                        }
                        Err(e) => warn!(pairing_id = %pairing_id, error = %e, "Retry failed"),
                    }
                });
            }
            HostEvent::NotReady { pairing_id, reason } => {
                // Re-setup is driven by the setup task that received the result
                debug!(pairing_id = %pairing_id, reason = %reason, "Pairing marked not ready");
            }
        }
    }

    /// Process hook events until `shutdown` resolves, then cancel every timer
    /// and unload all pairings
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<HostEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                Some(result) = self.timers.join_next(), if !self.timers.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(error = %e, "Host timer task panicked");
                        }
                    }
                }
            }
        }

        info!("Shutting down...");
        self.timers.abort_all();
        self.controller.shutdown().await;
    }
}
