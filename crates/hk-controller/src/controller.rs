//! Controller - runs one reconciler task per pairing
//!
//! Each registered pairing gets its own tokio task that owns the
//! [`Reconciler`]. Commands from the host arrive over an mpsc channel and are
//! raced against a shutdown signal, so unloading a pairing cancels an
//! in-flight connect or list and then disconnects. Pairings never share a
//! task, so one unreachable device cannot hold up another.

use std::ops::ControlFlow;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use hk_core::{ConfigNumber, EntityMaterializer, PairingId};
use hk_storage::AccessoryStore;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::lifecycle::{HostHooks, SetupResult};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::session::Session;
use crate::state_machine::{ReconcilerState, RetryPolicy};

const COMMAND_BUFFER: usize = 16;

enum DeviceCommand {
    Setup(oneshot::Sender<ReconcileResult<SetupResult>>),
    TimerFire(oneshot::Sender<ReconcileResult<SetupResult>>),
    ConfigChanged(
        ConfigNumber,
        oneshot::Sender<ReconcileResult<Option<ReconcileOutcome>>>,
    ),
    AttachSession(Session, oneshot::Sender<ReconcileResult<()>>),
}

struct DeviceHandle {
    commands: mpsc::Sender<DeviceCommand>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ReconcilerState>,
    task: JoinHandle<()>,
}

/// Owns every pairing's reconciler
pub struct Controller {
    store: Arc<AccessoryStore>,
    materializer: Arc<dyn EntityMaterializer>,
    hooks: Arc<dyn HostHooks>,
    retry_policy: RetryPolicy,
    devices: DashMap<PairingId, DeviceHandle>,
}

impl Controller {
    pub fn new(
        store: Arc<AccessoryStore>,
        materializer: Arc<dyn EntityMaterializer>,
        hooks: Arc<dyn HostHooks>,
    ) -> Self {
        Self {
            store,
            materializer,
            hooks,
            retry_policy: RetryPolicy::default(),
            devices: DashMap::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<AccessoryStore> {
        &self.store
    }

    /// Spawn the task for a pairing; nothing connects until `on_setup`
    pub fn register(&self, session: Session) -> ReconcileResult<()> {
        let pairing_id = session.pairing_id().clone();
        let entry = match self.devices.entry(pairing_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ReconcileError::AlreadyRegistered(pairing_id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => entry,
        };

        let reconciler = Reconciler::new(
            session,
            self.store.clone(),
            self.materializer.clone(),
            self.hooks.clone(),
        )
        .with_retry_policy(self.retry_policy);

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ReconcilerState::ColdStart);

        let task = tokio::spawn(run_device(reconciler, commands_rx, shutdown_rx, state_tx));
        entry.insert(DeviceHandle {
            commands: commands_tx,
            shutdown: shutdown_tx,
            state: state_rx,
            task,
        });

        debug!(pairing_id = %pairing_id, "Registered pairing");
        Ok(())
    }

    pub fn is_registered(&self, pairing_id: &PairingId) -> bool {
        self.devices.contains_key(pairing_id)
    }

    pub fn pairing_ids(&self) -> Vec<PairingId> {
        self.devices.iter().map(|r| r.key().clone()).collect()
    }

    /// Last state published by the pairing's task
    pub fn state(&self, pairing_id: &PairingId) -> Option<ReconcilerState> {
        self.devices.get(pairing_id).map(|h| *h.state.borrow())
    }

    /// Wait until the pairing's task publishes a state matching `predicate`
    pub async fn wait_for_state(
        &self,
        pairing_id: &PairingId,
        predicate: impl Fn(ReconcilerState) -> bool,
    ) -> ReconcileResult<ReconcilerState> {
        let mut state = self
            .devices
            .get(pairing_id)
            .map(|h| h.state.clone())
            .ok_or_else(|| ReconcileError::UnknownPairing(pairing_id.clone()))?;

        let result = state.wait_for(|s| predicate(*s)).await.map(|s| *s);
        result.map_err(|_| ReconcileError::Cancelled {
            pairing_id: pairing_id.clone(),
        })
    }

    pub async fn on_setup(&self, pairing_id: &PairingId) -> ReconcileResult<SetupResult> {
        let (tx, rx) = oneshot::channel();
        self.request(pairing_id, DeviceCommand::Setup(tx), rx).await
    }

    pub async fn on_timer_fire(&self, pairing_id: &PairingId) -> ReconcileResult<SetupResult> {
        let (tx, rx) = oneshot::channel();
        self.request(pairing_id, DeviceCommand::TimerFire(tx), rx)
            .await
    }

    /// Feed a config-number change that arrived outside the session
    pub async fn on_config_changed(
        &self,
        pairing_id: &PairingId,
        config_num: ConfigNumber,
    ) -> ReconcileResult<Option<ReconcileOutcome>> {
        let (tx, rx) = oneshot::channel();
        self.request(pairing_id, DeviceCommand::ConfigChanged(config_num, tx), rx)
            .await
    }

    pub async fn attach_session(&self, session: Session) -> ReconcileResult<()> {
        let pairing_id = session.pairing_id().clone();
        let (tx, rx) = oneshot::channel();
        self.request(&pairing_id, DeviceCommand::AttachSession(session, tx), rx)
            .await
    }

    /// Stop the pairing's task, cancelling whatever it is doing
    ///
    /// The session is disconnected and no entities are removed.
    pub async fn on_unload(&self, pairing_id: &PairingId) -> ReconcileResult<()> {
        let (_, handle) = self
            .devices
            .remove(pairing_id)
            .ok_or_else(|| ReconcileError::UnknownPairing(pairing_id.clone()))?;

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            error!(pairing_id = %pairing_id, error = %e, "Device task panicked");
        }
        info!(pairing_id = %pairing_id, "Unloaded pairing");
        Ok(())
    }

    /// Forget a pairing for good
    ///
    /// Unloads it if it is running, removes the entities of its cached
    /// topology and drops the cache entry. Returns whether anything was
    /// cached.
    pub async fn unpair(&self, pairing_id: &PairingId) -> ReconcileResult<bool> {
        match self.on_unload(pairing_id).await {
            Ok(()) | Err(ReconcileError::UnknownPairing(_)) => {}
            Err(e) => return Err(e),
        }

        let Some(snapshot) = self.store.load(pairing_id) else {
            debug!(pairing_id = %pairing_id, "Nothing cached to unpair");
            return Ok(false);
        };
        for unique_id in snapshot.entity_keys().values() {
            self.materializer.remove_entity(unique_id);
        }
        let removed = self.store.remove(pairing_id).await?;

        info!(pairing_id = %pairing_id, "Unpaired");
        Ok(removed)
    }

    /// Unload every pairing concurrently
    pub async fn shutdown(&self) {
        let pairing_ids = self.pairing_ids();
        let results = join_all(pairing_ids.iter().map(|id| self.on_unload(id))).await;
        for (pairing_id, result) in pairing_ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(pairing_id = %pairing_id, error = %e, "Failed to unload pairing");
            }
        }
    }

    async fn request<T>(
        &self,
        pairing_id: &PairingId,
        command: DeviceCommand,
        reply: oneshot::Receiver<ReconcileResult<T>>,
    ) -> ReconcileResult<T> {
        let commands = self
            .devices
            .get(pairing_id)
            .map(|h| h.commands.clone())
            .ok_or_else(|| ReconcileError::UnknownPairing(pairing_id.clone()))?;

        let cancelled = || ReconcileError::Cancelled {
            pairing_id: pairing_id.clone(),
        };
        commands.send(command).await.map_err(|_| cancelled())?;
        reply.await.map_err(|_| cancelled())?
    }
}

async fn run_device(
    mut reconciler: Reconciler,
    mut commands: mpsc::Receiver<DeviceCommand>,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<ReconcilerState>,
) {
    let pairing_id = reconciler.pairing_id().clone();
    let mut pushes = reconciler.subscribe();
    debug!(pairing_id = %pairing_id, "Device task started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            command = commands.recv() => {
                let Some(command) = command else { break };
                let resubscribe = matches!(command, DeviceCommand::AttachSession(..));
                if handle_command(&mut reconciler, command, &mut shutdown).await.is_break() {
                    break;
                }
                if resubscribe {
                    pushes = reconciler.subscribe();
                }
            }

            config_num = next_push(&mut pushes) => {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    result = reconciler.on_config_changed(config_num) => {
                        if let Err(e) = result {
                            warn!(pairing_id = %pairing_id, error = %e, "Config change refresh failed");
                        }
                    }
                }
            }
        }
        state.send_replace(reconciler.state());
    }

    reconciler.unload().await;
    state.send_replace(reconciler.state());
    debug!(pairing_id = %pairing_id, "Device task stopped");
}

/// Run one command, racing it against shutdown
async fn handle_command(
    reconciler: &mut Reconciler,
    command: DeviceCommand,
    shutdown: &mut watch::Receiver<bool>,
) -> ControlFlow<()> {
    let pairing_id = reconciler.pairing_id().clone();
    let cancelled = || ReconcileError::Cancelled {
        pairing_id: pairing_id.clone(),
    };

    match command {
        DeviceCommand::Setup(reply) => {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    let _ = reply.send(Err(cancelled()));
                    return ControlFlow::Break(());
                }
                result = reconciler.setup() => {
                    let _ = reply.send(result);
                }
            }
        }
        DeviceCommand::TimerFire(reply) => {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    let _ = reply.send(Err(cancelled()));
                    return ControlFlow::Break(());
                }
                result = reconciler.on_timer_fire() => {
                    let _ = reply.send(result);
                }
            }
        }
        DeviceCommand::ConfigChanged(config_num, reply) => {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    let _ = reply.send(Err(cancelled()));
                    return ControlFlow::Break(());
                }
                result = reconciler.on_config_changed(config_num) => {
                    let _ = reply.send(result);
                }
            }
        }
        DeviceCommand::AttachSession(session, reply) => {
            let _ = reply.send(reconciler.attach_session(session).await);
        }
    }

    ControlFlow::Continue(())
}

/// Next pushed config number; pending forever without a live subscription
async fn next_push(pushes: &mut Option<broadcast::Receiver<ConfigNumber>>) -> ConfigNumber {
    if let Some(rx) = pushes {
        loop {
            match rx.recv().await {
                Ok(config_num) => return config_num,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Skipped stale config change notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    std::future::pending().await
}
