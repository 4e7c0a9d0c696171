//! Topology reconciler for a single pairing
//!
//! Serves entities from the cached topology immediately, then brings them in
//! line with the live device. Entity creation and removal for one reconcile
//! pass happens synchronously, so a concurrent cancellation never observes a
//! half-applied diff.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hk_core::{ConfigNumber, EntityKey, EntityMaterializer, PairingId, TopologySnapshot, UniqueId};
use hk_storage::AccessoryStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::diff::TopologyDiff;
use crate::error::{ReconcileError, ReconcileResult, SessionError};
use crate::lifecycle::{HostHooks, SetupResult};
use crate::session::Session;
use crate::state_machine::{ReconcilerState, RetryPolicy};

/// Entity changes applied by one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub config_num: ConfigNumber,
    pub created: Vec<UniqueId>,
    pub removed: Vec<UniqueId>,
    /// False when the live config number matched and nothing was touched
    pub config_changed: bool,
}

impl ReconcileOutcome {
    fn unchanged(config_num: ConfigNumber) -> Self {
        Self {
            config_num,
            ..Default::default()
        }
    }
}

pub struct Reconciler {
    pairing_id: PairingId,
    session: Session,
    store: Arc<AccessoryStore>,
    materializer: Arc<dyn EntityMaterializer>,
    hooks: Arc<dyn HostHooks>,
    retry_policy: RetryPolicy,
    state: ReconcilerState,
    active: Option<Arc<TopologySnapshot>>,
    materialized: BTreeMap<EntityKey, UniqueId>,
    retry_tries: u32,
    last_retry_delay: Option<Duration>,
    last_error: Option<String>,
    pending_save: bool,
}

impl Reconciler {
    pub fn new(
        session: Session,
        store: Arc<AccessoryStore>,
        materializer: Arc<dyn EntityMaterializer>,
        hooks: Arc<dyn HostHooks>,
    ) -> Self {
        Self {
            pairing_id: session.pairing_id().clone(),
            session,
            store,
            materializer,
            hooks,
            retry_policy: RetryPolicy::default(),
            state: ReconcilerState::ColdStart,
            active: None,
            materialized: BTreeMap::new(),
            retry_tries: 0,
            last_retry_delay: None,
            last_error: None,
            pending_save: false,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn pairing_id(&self) -> &PairingId {
        &self.pairing_id
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    /// Topology the current entities were built from
    pub fn active_snapshot(&self) -> Option<&Arc<TopologySnapshot>> {
        self.active.as_ref()
    }

    /// Unique ids of every entity this reconciler has created and not removed
    pub fn materialized(&self) -> impl Iterator<Item = &UniqueId> {
        self.materialized.values()
    }

    /// Number of consecutive failed live attempts
    pub fn retry_tries(&self) -> u32 {
        self.retry_tries
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<ConfigNumber>> {
        self.session.subscribe()
    }

    /// Result matching the current state, for callers that poll
    pub fn setup_result(&self) -> SetupResult {
        match self.state {
            ReconcilerState::LiveSynced | ReconcilerState::CacheLoaded => SetupResult::Ready,
            ReconcilerState::RetryScheduled => {
                SetupResult::RetryAfter(self.last_retry_delay.unwrap_or_default())
            }
            state => SetupResult::NotReady {
                reason: self
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("pairing is in state {state:?}")),
            },
        }
    }

    fn transition(&mut self, to: ReconcilerState) -> ReconcileResult<()> {
        self.state = self.state.try_transition(to)?;
        debug!(pairing_id = %self.pairing_id, state = ?self.state, "Reconciler state changed");
        Ok(())
    }

    /// Bring the pairing up: cached entities first, then the live topology
    ///
    /// Valid from `ColdStart`, or from `FailedTerminal` when the host retries.
    pub async fn setup(&mut self) -> ReconcileResult<SetupResult> {
        match self.state {
            ReconcilerState::ColdStart => {}
            ReconcilerState::FailedTerminal => self.transition(ReconcilerState::ColdStart)?,
            state => {
                return Err(ReconcileError::AlreadySetUp {
                    pairing_id: self.pairing_id.clone(),
                    state,
                })
            }
        }

        if let Some(cached) = self.store.load(&self.pairing_id) {
            self.transition(ReconcilerState::CacheLoaded)?;
            let outcome = self.apply(&cached);
            info!(
                pairing_id = %self.pairing_id,
                config_num = %cached.config_num(),
                created = outcome.created.len(),
                "Restored entities from cached topology"
            );
            self.active = Some(cached);
        }

        self.connect_and_sync().await
    }

    /// Retry timer expired
    ///
    /// Ignored unless a retry is actually scheduled; a stale timer after
    /// unload or a successful sync does nothing.
    pub async fn on_timer_fire(&mut self) -> ReconcileResult<SetupResult> {
        if self.state != ReconcilerState::RetryScheduled {
            debug!(pairing_id = %self.pairing_id, state = ?self.state, "Ignoring stale retry timer");
            return Ok(self.setup_result());
        }
        self.connect_and_sync().await
    }

    /// The device announced a new configuration number
    ///
    /// Re-lists over the open session and reconciles. Returns `None` when the
    /// notification was ignored.
    pub async fn on_config_changed(
        &mut self,
        config_num: ConfigNumber,
    ) -> ReconcileResult<Option<ReconcileOutcome>> {
        if self.state != ReconcilerState::LiveSynced || !self.session.is_connected() {
            debug!(pairing_id = %self.pairing_id, state = ?self.state, "Ignoring config change notification");
            return Ok(None);
        }
        if self.active.as_ref().map(|s| s.config_num()) == Some(config_num) {
            return Ok(None);
        }

        info!(pairing_id = %self.pairing_id, config_num = %config_num, "Accessory configuration changed");
        match self.session.list_accessories_and_services().await {
            Ok(snapshot) => Ok(Some(self.reconcile_live(snapshot).await)),
            Err(e) => {
                self.session.close_quietly().await;
                self.handle_session_failure(e)?;
                Ok(None)
            }
        }
    }

    /// Replace the session, e.g. after the transport for a cached-only
    /// pairing was discovered
    pub async fn attach_session(&mut self, session: Session) -> ReconcileResult<()> {
        if session.pairing_id() != &self.pairing_id {
            return Err(ReconcileError::PairingMismatch {
                expected: self.pairing_id.clone(),
                found: session.pairing_id().clone(),
            });
        }
        self.session.close_quietly().await;
        self.session = session;
        debug!(pairing_id = %self.pairing_id, live = self.session.is_live(), "Session attached");
        Ok(())
    }

    /// Tear down the pairing without removing any entities
    ///
    /// The host keeps its entities across unload so a later setup can restore
    /// them from the cache.
    pub async fn unload(&mut self) {
        self.session.close_quietly().await;
        if let Err(e) = self.transition(ReconcilerState::ColdStart) {
            warn!(pairing_id = %self.pairing_id, error = %e, "Unexpected state on unload");
            self.state = ReconcilerState::ColdStart;
        }
        self.active = None;
        self.materialized.clear();
        self.retry_tries = 0;
        self.last_retry_delay = None;
        self.last_error = None;
        info!(pairing_id = %self.pairing_id, "Pairing unloaded");
    }

    async fn connect_and_sync(&mut self) -> ReconcileResult<SetupResult> {
        self.transition(ReconcilerState::LiveConnecting)?;

        match self.fetch_live().await {
            Ok(snapshot) => {
                self.transition(ReconcilerState::LiveSynced)?;
                self.retry_tries = 0;
                self.last_retry_delay = None;
                self.last_error = None;
                self.reconcile_live(snapshot).await;
                Ok(SetupResult::Ready)
            }
            Err(e) => self.handle_session_failure(e),
        }
    }

    async fn fetch_live(&mut self) -> Result<TopologySnapshot, SessionError> {
        self.session.connect().await?;
        match self.session.list_accessories_and_services().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.session.close_quietly().await;
                Err(e)
            }
        }
    }

    fn handle_session_failure(&mut self, error: SessionError) -> ReconcileResult<SetupResult> {
        let reason = error.to_string();
        self.last_error = Some(reason.clone());

        if !error.is_transient() {
            self.transition(ReconcilerState::FailedTerminal)?;
            warn!(pairing_id = %self.pairing_id, error = %error, "Pairing rejected by accessory");
            self.hooks.mark_not_ready(&self.pairing_id, &reason);
            return Err(ReconcileError::Auth {
                pairing_id: self.pairing_id.clone(),
                reason,
            });
        }

        if self.active.is_none() {
            self.transition(ReconcilerState::FailedTerminal)?;
            warn!(
                pairing_id = %self.pairing_id,
                error = %error,
                "Accessory unreachable and no cached topology"
            );
            self.hooks.mark_not_ready(&self.pairing_id, &reason);
            return Ok(SetupResult::NotReady { reason });
        }

        self.transition(ReconcilerState::RetryScheduled)?;
        let delay = self.retry_policy.delay(self.retry_tries);
        self.retry_tries = self.retry_tries.saturating_add(1);
        self.last_retry_delay = Some(delay);
        info!(
            pairing_id = %self.pairing_id,
            error = %error,
            entities = self.materialized.len(),
            tries = self.retry_tries,
            "Accessory unreachable, serving cached entities, retrying in {:?}",
            delay
        );
        self.hooks.schedule_retry(&self.pairing_id, delay);
        Ok(SetupResult::RetryAfter(delay))
    }

    async fn reconcile_live(&mut self, snapshot: TopologySnapshot) -> ReconcileOutcome {
        let config_num = snapshot.config_num();

        match self.active.as_ref().map(|s| s.config_num()) {
            Some(previous) if previous == config_num => {
                debug!(pairing_id = %self.pairing_id, config_num = %config_num, "Topology unchanged");
                if self.pending_save {
                    if let Some(active) = self.active.clone() {
                        self.persist(active).await;
                    }
                }
                return ReconcileOutcome::unchanged(config_num);
            }
            Some(previous) if config_num < previous => {
                warn!(
                    pairing_id = %self.pairing_id,
                    previous = %previous,
                    config_num = %config_num,
                    "Config number went backwards, trusting live topology"
                );
            }
            _ => {}
        }

        let snapshot = Arc::new(snapshot);
        let mut outcome = self.apply(&snapshot);
        outcome.config_changed = true;
        self.active = Some(Arc::clone(&snapshot));
        info!(
            pairing_id = %self.pairing_id,
            config_num = %config_num,
            created = outcome.created.len(),
            removed = outcome.removed.len(),
            "Reconciled live topology"
        );

        // The store records the snapshot before its first await
        self.persist(snapshot).await;
        outcome
    }

    /// Materialize `snapshot`'s entities; never awaits
    fn apply(&mut self, snapshot: &TopologySnapshot) -> ReconcileOutcome {
        let diff = TopologyDiff::between(&self.materialized, &snapshot.entity_keys());
        let mut outcome = ReconcileOutcome::unchanged(snapshot.config_num());

        for key in diff.to_create {
            let Some((accessory, service)) = snapshot.resolve(&key) else {
                continue;
            };
            self.materializer
                .create_entity(&self.pairing_id, accessory, service);
            let unique_id = key.unique_id(&self.pairing_id);
            outcome.created.push(unique_id.clone());
            self.materialized.insert(key, unique_id);
        }

        for (key, unique_id) in diff.to_remove {
            self.materializer.remove_entity(&unique_id);
            self.materialized.remove(&key);
            outcome.removed.push(unique_id);
        }

        outcome
    }

    async fn persist(&mut self, snapshot: Arc<TopologySnapshot>) {
        match self.store.save(snapshot).await {
            Ok(()) => self.pending_save = false,
            Err(e) => {
                warn!(
                    pairing_id = %self.pairing_id,
                    error = %e,
                    "Failed to persist topology, will retry on next sync"
                );
                self.pending_save = true;
            }
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("pairing_id", &self.pairing_id)
            .field("state", &self.state)
            .field("session", &self.session)
            .field("entities", &self.materialized.len())
            .field("retry_tries", &self.retry_tries)
            .finish()
    }
}
