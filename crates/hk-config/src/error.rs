//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid YAML: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `!include` argument that is not a usable path
    #[error("bad include '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    /// `!env_var` without a default and the variable is unset
    #[error("environment variable '{var}' is not set and has no default")]
    EnvVarNotFound { var: String },

    #[error("unsupported YAML tag '{tag}'")]
    UnknownTag { tag: String },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid configuration: {message}")]
    ValidationFailed { message: String },
}
