//! Agent configuration.
//!
//! Read from a TOML file and then overridden by `CHECKIN__`-prefixed
//! environment variables, e.g. `CHECKIN__PRODUCTION=true` or
//! `CHECKIN__DATA_DIR=/srv/checkin`.
//!
//! ```toml
//! production = true
//! data_dir = "/var/lib/checkin"
//!
//! [[instances]]
//! name = "arena"
//! feed = "/run/checkin/arena.jsonl"
//!
//! [instances.sdk]
//! api_token = "..."
//! timezone = "America/Chicago"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use checkin_core::{ConfigError, SdkConfig};
use serde::Deserialize;
use thiserror::Error;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CHECKIN";

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CHECKIN_CONFIG";

/// Errors loading the agent configuration.
#[derive(Debug, Error)]
pub enum AgentConfigError {
    /// The sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Nothing to run.
    #[error("No instances configured")]
    NoInstances,

    /// Two instances share a name.
    #[error("Instance name '{0}' is used more than once")]
    DuplicateName(String),

    /// Two instances would share a storage namespace.
    #[error("Instances '{first}' and '{second}' use the same API token")]
    SharedToken {
        /// Instance configured first.
        first: String,
        /// Instance configured second.
        second: String,
    },

    /// An instance's SDK settings are invalid.
    #[error("Instance '{instance}' is invalid: {source}")]
    InvalidInstance {
        /// Instance name.
        instance: String,
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
}

/// Top-level agent settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Production logging (JSON files plus compact stdout).
    pub production: bool,

    /// Where instance state is stored. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,

    /// SDK instances to run.
    pub instances: Vec<InstanceConfig>,
}

/// One SDK instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceConfig {
    /// Name used in logs and by the feed.
    pub name: String,

    /// SDK settings.
    #[serde(default)]
    pub sdk: SdkConfig,

    /// JSON-lines scanner event feed, `-` for stdin.
    #[serde(default)]
    pub feed: Option<PathBuf>,
}

impl AgentConfig {
    /// Load from `path` (if given and present) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, AgentConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`AgentConfig::load`], reading overrides from `env` instead of
    /// the process environment when given.
    ///
    /// # Errors
    ///
    /// Returns an error if a source is malformed or validation fails.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, AgentConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check instance names, token isolation and every instance's settings.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), AgentConfigError> {
        if self.instances.is_empty() {
            return Err(AgentConfigError::NoInstances);
        }

        let mut names = HashSet::new();
        let mut tokens: HashMap<&str, &str> = HashMap::new();
        for instance in &self.instances {
            if !names.insert(instance.name.as_str()) {
                return Err(AgentConfigError::DuplicateName(instance.name.clone()));
            }
            instance
                .sdk
                .validate()
                .map_err(|source| AgentConfigError::InvalidInstance {
                    instance: instance.name.clone(),
                    source,
                })?;
            if let Some(first) = tokens.insert(instance.sdk.namespace(), &instance.name) {
                return Err(AgentConfigError::SharedToken {
                    first: first.to_string(),
                    second: instance.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Directory for instance state.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(checkin_core::default_data_dir)
    }
}

/// Configuration file path: `CHECKIN_CONFIG`, else `agent.toml` in the
/// platform config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from).or_else(|| {
        directories::ProjectDirs::from("", "", "checkin")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    })
}
