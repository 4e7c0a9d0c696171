//! YAML configuration for the HomeKit reconciler
//!
//! Loads `configuration.yaml` with support for a few custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use hk_config::ReconcilerConfig;
//!
//! let config = ReconcilerConfig::load("/config")?;
//! for pairing in &config.pairings {
//!     println!("{}", pairing.pairing_id);
//! }
//! ```

mod error;
mod loader;
mod reconciler_config;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use reconciler_config::{PairingConfig, ReconcilerConfig, RetryConfig, CONFIG_FILE};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
