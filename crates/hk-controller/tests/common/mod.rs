//! Common test utilities for the reconciler
//!
//! Fixture loading, a recording materializer backed by the real registries
//! and recording host hooks.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hk_controller::testing::FakeTransport;
use hk_controller::{accessories_from_file, Controller, HostEvent, HostHooks, Reconciler, RetryPolicy, Session};
use hk_core::{Accessory, ConfigNumber, EntityMaterializer, PairingId, Service, UniqueId};
use hk_registry::Registries;
use hk_storage::{AccessoryStore, Storage};
use tempfile::TempDir;

pub const PAIRING: &str = "00:00:00:00:00:00";

pub fn pairing_id() -> PairingId {
    PairingId::new(PAIRING).unwrap()
}

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Load an accessory database from `tests/fixtures/`
pub fn load_accessories(name: &str) -> Vec<Accessory> {
    accessories_from_file(fixture_path(name))
        .unwrap_or_else(|e| panic!("Failed to load fixture '{}': {}", name, e))
}

pub fn unique_id(serial: &str, service_id: u64) -> UniqueId {
    UniqueId::for_service(&pairing_id(), serial, service_id)
}

/// Retry policy without jitter so delays are exact
pub fn exact_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_jitter: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializerCall {
    Create(UniqueId),
    Remove(UniqueId),
}

/// Records every call, then forwards to the real registries
pub struct RecordingMaterializer {
    pub registries: Registries,
    calls: Mutex<Vec<MaterializerCall>>,
}

impl RecordingMaterializer {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            registries: Registries::new(storage),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<MaterializerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<MaterializerCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn created(&self) -> Vec<UniqueId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MaterializerCall::Create(id) => Some(id),
                MaterializerCall::Remove(_) => None,
            })
            .collect()
    }

    pub fn removed(&self) -> Vec<UniqueId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MaterializerCall::Remove(id) => Some(id),
                MaterializerCall::Create(_) => None,
            })
            .collect()
    }

    /// Unique id of a registered entity, looked up by entity id
    pub fn unique_id_of(&self, entity_id: &str) -> Option<String> {
        self.registries
            .entities
            .get(entity_id)
            .map(|entry| entry.unique_id.clone())
    }
}

impl EntityMaterializer for RecordingMaterializer {
    fn create_entity(&self, pairing_id: &PairingId, accessory: &Accessory, service: &Service) {
        self.calls
            .lock()
            .unwrap()
            .push(MaterializerCall::Create(UniqueId::for_service(
                pairing_id,
                &accessory.serial_number,
                service.iid,
            )));
        self.registries.create_entity(pairing_id, accessory, service);
    }

    fn remove_entity(&self, unique_id: &UniqueId) {
        self.calls
            .lock()
            .unwrap()
            .push(MaterializerCall::Remove(unique_id.clone()));
        self.registries.remove_entity(unique_id);
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::RetryScheduled { delay, .. } => Some(delay),
                HostEvent::NotReady { .. } => None,
            })
            .collect()
    }

    pub fn not_ready_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HostEvent::NotReady { .. }))
            .count()
    }
}

impl HostHooks for RecordingHooks {
    fn mark_not_ready(&self, pairing_id: &PairingId, reason: &str) {
        self.events.lock().unwrap().push(HostEvent::NotReady {
            pairing_id: pairing_id.clone(),
            reason: reason.to_string(),
        });
    }

    fn schedule_retry(&self, pairing_id: &PairingId, delay: Duration) {
        self.events.lock().unwrap().push(HostEvent::RetryScheduled {
            pairing_id: pairing_id.clone(),
            delay,
        });
    }
}

/// A config directory plus everything a reconciler needs
pub struct TestHarness {
    pub dir: TempDir,
    pub storage: Arc<Storage>,
    pub store: Arc<AccessoryStore>,
    pub materializer: Arc<RecordingMaterializer>,
    pub hooks: Arc<RecordingHooks>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self::in_dir(dir).await
    }

    async fn in_dir(dir: TempDir) -> Self {
        let storage = Arc::new(Storage::new(dir.path()));
        let store = Arc::new(AccessoryStore::open(storage.clone()).await);
        let materializer = Arc::new(RecordingMaterializer::new(storage.clone()));
        Self {
            dir,
            storage,
            store,
            materializer,
            hooks: Arc::new(RecordingHooks::default()),
        }
    }

    /// Harness whose store starts with `accessories` cached for [`PAIRING`]
    pub async fn with_cache(accessories: &[Accessory], config_num: u64) -> Self {
        let harness = Self::new().await;
        harness.seed_cache(accessories, config_num);
        harness.restart().await
    }

    /// Simulate a process restart: everything in memory is dropped and the
    /// store is reopened from disk
    pub async fn restart(self) -> Self {
        Self::in_dir(self.dir).await
    }

    /// Write the entity-map document directly, as a previous run would have
    pub fn seed_cache(&self, accessories: &[Accessory], config_num: u64) {
        let doc = serde_json::json!({
            "version": 1,
            "minor_version": 1,
            "key": "homekit_controller-entity-map",
            "data": {
                "pairings": {
                    PAIRING: {
                        "config_num": config_num,
                        "accessories": accessories,
                    }
                }
            }
        });
        let dir = self.storage.storage_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("homekit_controller-entity-map"),
            serde_json::to_string_pretty(&doc).unwrap(),
        )
        .unwrap();
    }

    pub fn reconciler(&self, session: Session) -> Reconciler {
        Reconciler::new(
            session,
            self.store.clone(),
            self.materializer.clone(),
            self.hooks.clone(),
        )
        .with_retry_policy(exact_retry_policy())
    }

    pub fn live_reconciler(&self, transport: Arc<FakeTransport>) -> Reconciler {
        self.reconciler(Session::live(pairing_id(), transport))
    }

    pub fn controller(&self) -> Controller {
        Controller::new(
            self.store.clone(),
            self.materializer.clone(),
            self.hooks.clone(),
        )
        .with_retry_policy(exact_retry_policy())
    }

    pub fn cached_config_num(&self) -> Option<ConfigNumber> {
        self.store.load(&pairing_id()).map(|s| s.config_num())
    }
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
