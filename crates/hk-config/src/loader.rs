//! YAML loading with `!include` and `!env_var`
//!
//! - `!include path` splices in another file, relative to the including file
//! - `!env_var NAME [fallback]` substitutes an environment variable
//!
//! Any other tag is rejected.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace};

use crate::error::{ConfigError, ConfigResult};

/// Resolves tags while loading a tree of YAML files
pub struct YamlLoader {
    config_dir: PathBuf,
    /// Files being loaded right now, outermost first
    loading: Vec<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            loading: Vec::new(),
        }
    }

    /// Load `path` (relative to the config dir) with every tag resolved
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.config_dir.join(path.as_ref());
        self.load_path(path)
    }

    fn load_path(&mut self, path: PathBuf) -> ConfigResult<Value> {
        if self.loading.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        debug!("Loading {:?}", path);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let value: Value =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
                path: path.clone(),
                source,
            })?;

        self.loading.push(path);
        let resolved = self.resolve(value);
        self.loading.pop();
        resolved
    }

    fn resolve(&mut self, value: Value) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged),
            Value::Mapping(map) => map
                .into_iter()
                .map(|(k, v)| self.resolve(v).map(|v| (k, v)))
                .collect::<ConfigResult<Mapping>>()
                .map(Value::Mapping),
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Resolving {} {:?}", tag, tagged.value);

        match tag.as_str() {
            "!include" => {
                let target = self.include_target(&tagged.value)?;
                self.load_path(target)
            }
            "!env_var" => env_var(&tagged.value),
            _ => Err(ConfigError::UnknownTag { tag }),
        }
    }

    /// Include paths are relative to the file that contains the tag
    fn include_target(&self, value: &Value) -> ConfigResult<PathBuf> {
        let Value::String(raw) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{value:?}"),
                reason: "path must be a string".to_string(),
            });
        };

        let base = self
            .loading
            .last()
            .and_then(|file| file.parent())
            .unwrap_or(&self.config_dir);
        Ok(base.join(raw))
    }
}

fn env_var(value: &Value) -> ConfigResult<Value> {
    let Value::String(raw) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let (name, fallback) = match raw.split_once(char::is_whitespace) {
        Some((name, fallback)) => (name, Some(fallback.trim())),
        None => (raw.as_str(), None),
    };

    match (std::env::var(name), fallback) {
        (Ok(value), _) => Ok(Value::String(value)),
        (Err(_), Some(fallback)) => Ok(Value::String(fallback.to_string())),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// Load a YAML file from `config_dir` with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}
