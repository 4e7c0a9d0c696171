//! Scripted accessory transport for tests
//!
//! [`FakeTransport`] serves an in-memory accessory database and can be told
//! to fail or hang, which is how the reconciler is exercised without
//! hardware. Only built for tests or with the `testing` feature.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use hk_core::{Accessory, ConfigNumber};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::SessionError;
use crate::session::AccessoryTransport;

#[derive(Default)]
struct FakeState {
    accessories: Vec<Accessory>,
    config_num: ConfigNumber,
    connect_failure: Option<SessionError>,
    list_failure: Option<SessionError>,
    hang_on_connect: bool,
    open: bool,
    connect_calls: usize,
    list_calls: usize,
    close_calls: usize,
}

pub struct FakeTransport {
    state: Mutex<FakeState>,
    changes: broadcast::Sender<ConfigNumber>,
}

impl FakeTransport {
    /// Transport serving `accessories` at config number 1
    pub fn new(accessories: Vec<Accessory>) -> Arc<Self> {
        Self::with_config_num(accessories, ConfigNumber(1))
    }

    pub fn with_config_num(accessories: Vec<Accessory>, config_num: ConfigNumber) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Mutex::new(FakeState {
                accessories,
                config_num,
                ..Default::default()
            }),
            changes,
        })
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every `open` with `error` until cleared with `None`
    pub fn fail_connect(&self, error: Option<SessionError>) {
        self.lock().connect_failure = error;
    }

    /// Fail every `list_accessories` with `error` until cleared with `None`
    pub fn fail_list(&self, error: Option<SessionError>) {
        self.lock().list_failure = error;
    }

    /// Make `open` wait forever
    pub fn hang_on_connect(&self, hang: bool) {
        self.lock().hang_on_connect = hang;
    }

    /// Replace the database without notifying subscribers
    pub fn set_accessories(&self, accessories: Vec<Accessory>, config_num: ConfigNumber) {
        let mut state = self.lock();
        state.accessories = accessories;
        state.config_num = config_num;
    }

    /// Replace the database, bump the config number and notify subscribers
    pub fn update_accessories(&self, accessories: Vec<Accessory>) -> ConfigNumber {
        let config_num = {
            let mut state = self.lock();
            state.accessories = accessories;
            state.config_num = state.config_num.next();
            state.config_num
        };
        // No subscribers is fine
        let _ = self.changes.send(config_num);
        config_num
    }

    pub fn config_num(&self) -> ConfigNumber {
        self.lock().config_num
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }
}

#[async_trait]
impl AccessoryTransport for FakeTransport {
    async fn open(&self) -> Result<(), SessionError> {
        let (hang, failure) = {
            let mut state = self.lock();
            state.connect_calls += 1;
            (state.hang_on_connect, state.connect_failure.clone())
        };

        if hang {
            debug!("Fake transport hanging on connect");
            std::future::pending::<()>().await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        self.lock().open = true;
        Ok(())
    }

    async fn list_accessories(&self) -> Result<(ConfigNumber, Vec<Accessory>), SessionError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if let Some(error) = state.list_failure.clone() {
            if matches!(error, SessionError::Disconnected(_)) {
                state.open = false;
            }
            return Err(error);
        }
        if !state.open {
            return Err(SessionError::Disconnected("transport is closed".into()));
        }
        Ok((state.config_num, state.accessories.clone()))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.close_calls += 1;
        state.open = false;
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ConfigNumber>> {
        Some(self.changes.subscribe())
    }
}
