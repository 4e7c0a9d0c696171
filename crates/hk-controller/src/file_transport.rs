//! Accessory transport backed by a HAP JSON file
//!
//! Stands in for a device that is not on the network: the accessory database
//! is read once from disk and served at a fixed configuration number.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hk_core::{parse_accessories, Accessory, ConfigNumber, TopologyError};
use thiserror::Error;
use tracing::debug;

use crate::error::SessionError;
use crate::session::AccessoryTransport;

#[derive(Debug, Error)]
pub enum AccessoryFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid accessory database in {path}: {source}")]
    Topology { path: String, source: TopologyError },
}

/// Load an accessory database (HAP JSON) from disk
pub fn accessories_from_file(path: impl AsRef<Path>) -> Result<Vec<Accessory>, AccessoryFileError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|source| AccessoryFileError::Io {
        path: display.clone(),
        source,
    })?;
    parse_accessories(&json).map_err(|source| AccessoryFileError::Topology {
        path: display,
        source,
    })
}

pub struct FileTransport {
    path: PathBuf,
    config_num: ConfigNumber,
    accessories: Vec<Accessory>,
    open: AtomicBool,
}

impl FileTransport {
    pub fn load(
        path: impl Into<PathBuf>,
        config_num: ConfigNumber,
    ) -> Result<Arc<Self>, AccessoryFileError> {
        let path = path.into();
        let accessories = accessories_from_file(&path)?;
        debug!(path = %path.display(), accessories = accessories.len(), "Loaded accessory database");
        Ok(Arc::new(Self {
            path,
            config_num,
            accessories,
            open: AtomicBool::new(false),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AccessoryTransport for FileTransport {
    async fn open(&self) -> Result<(), SessionError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_accessories(&self) -> Result<(ConfigNumber, Vec<Accessory>), SessionError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SessionError::Disconnected(format!(
                "{} is not open",
                self.path.display()
            )));
        }
        Ok((self.config_num, self.accessories.clone()))
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
