//! HomeKit topology reconciler
//!
//! Main entry point: loads the configuration, restores cached topologies and
//! keeps every configured pairing's entities in sync until Ctrl-C.

mod host;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hk_config::{PairingConfig, ReconcilerConfig};
use hk_controller::{ChannelHooks, Controller, FileTransport, RetryPolicy, Session};
use hk_core::ConfigNumber;
use hk_registry::Registries;
use hk_storage::{AccessoryStore, Storage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::host::Host;

#[derive(Debug, Parser)]
#[command(name = "hk-reconciler", version, about = "HomeKit accessory topology reconciler")]
struct Args {
    /// Directory containing configuration.yaml and .storage/
    #[arg(short, long, env = "HK_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Log filter, overrides log_level from the configuration
    #[arg(short, long, env = "HK_LOG_LEVEL")]
    log_level: Option<String>,
}

fn init_tracing(directive: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directive)
        .with_context(|| format!("invalid log level '{directive}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}

/// Session for a configured pairing: live over a file-backed transport when
/// an accessory database is given, cached-only otherwise
fn build_session(
    config: &ReconcilerConfig,
    config_dir: &Path,
    pairing: &PairingConfig,
) -> Result<Session> {
    let Some(path) = config.accessories_path(config_dir, pairing) else {
        return Ok(Session::cached_only(pairing.pairing_id.clone()));
    };

    let transport = FileTransport::load(&path, ConfigNumber(pairing.config_num))
        .with_context(|| format!("loading accessories for {}", pairing.pairing_id))?;
    info!(pairing_id = %pairing.pairing_id, path = %transport.path().display(), "Serving accessories from file");
    Ok(Session::live(pairing.pairing_id.clone(), transport))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ReconcilerConfig::load(&args.config_dir).context("loading configuration")?;
    init_tracing(args.log_level.as_deref().unwrap_or(&config.log_level))?;

    info!("Starting HomeKit reconciler");

    let storage = Arc::new(Storage::new(config.storage_root(&args.config_dir)));
    let store = Arc::new(AccessoryStore::open(storage.clone()).await);
    info!("Restored cached topology for {} pairings", store.len());
    for cached in store.pairing_ids() {
        if !config.pairings.iter().any(|p| p.pairing_id == cached) {
            warn!(pairing_id = %cached, "Cached pairing is not configured; its entities stay until it is unpaired");
        }
    }

    let registries = Arc::new(Registries::new(storage));
    registries
        .load_all()
        .await
        .context("loading entity and device registries")?;

    let retry_policy = RetryPolicy {
        base_delay: config.retry.base_delay(),
        max_exponent: config.retry.max_exponent,
        max_jitter: config.retry.max_jitter(),
    };
    let (hooks, events) = ChannelHooks::new();
    let controller = Arc::new(
        Controller::new(store, registries.clone(), Arc::new(hooks)).with_retry_policy(retry_policy),
    );

    let mut host = Host::new(controller.clone(), config.setup_retry_delay());
    for pairing in &config.pairings {
        let session = build_session(&config, &args.config_dir, pairing)?;
        controller.register(session)?;
        host.start_setup(pairing.pairing_id.clone());
    }

    info!("Managing {} pairings", config.pairings.len());

    host.run(events, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await;

    registries
        .save_all()
        .await
        .context("saving entity and device registries")?;

    info!("Stopped");
    Ok(())
}
