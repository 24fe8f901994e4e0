//! Per-instance SDK configuration.
//!
//! An SDK instance is identified by its API credential. Everything else has
//! a default matching the backend's expectations:
//!
//! - API root `https://api3.fanmaker.com/api/v3`
//! - 15 second request timeout
//! - 60 second delivery retry delay
//! - 1000 entry sighting history
//! - 60000 ms uniqueness throttle until the backend says otherwise
//! - UTC timestamps on the wire

use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default versioned API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api3.fanmaker.com/api/v3";

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Default delay before re-sending a failed sighting batch.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Default history capacity.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Default uniqueness throttle in milliseconds.
pub const DEFAULT_THROTTLE_MS: u64 = 60_000;

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Settings of one SDK instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// API credential. Also namespaces persisted state.
    pub api_token: String,

    /// Versioned API root.
    pub api_base_url: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,

    /// Delay before retrying a failed sighting batch.
    pub retry_delay_secs: u64,

    /// Maximum number of sightings kept for deduplication.
    pub history_limit: usize,

    /// Throttle applied when the backend does not provide a usable one.
    pub default_throttle_ms: u64,

    /// Timezone used to format wire timestamps.
    #[serde(with = "timezone_serde")]
    pub timezone: Tz,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_throttle_ms: DEFAULT_THROTTLE_MS,
            timezone: chrono_tz::UTC,
        }
    }
}

impl SdkConfig {
    /// Create a configuration with defaults for `api_token`.
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            ..Self::default()
        }
    }

    /// Delivery retry delay as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Storage namespace for this instance.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.api_token
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns a single `ValidationError`, or `MultipleValidationErrors` when
    /// more than one field is invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.api_token.trim().is_empty() {
            errors.push(ConfigError::ValidationError {
                field: "api_token",
                message: "must not be empty".into(),
            });
        }

        match Url::parse(&self.api_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ConfigError::ValidationError {
                field: "api_base_url",
                message: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ConfigError::ValidationError {
                field: "api_base_url",
                message: e.to_string(),
            }),
        }

        if self.request_timeout_secs == 0 {
            errors.push(ConfigError::ValidationError {
                field: "request_timeout_secs",
                message: "must be greater than zero".into(),
            });
        }

        if self.retry_delay_secs == 0 {
            errors.push(ConfigError::ValidationError {
                field: "retry_delay_secs",
                message: "must be greater than zero".into(),
            });
        }

        if self.history_limit == 0 {
            errors.push(ConfigError::ValidationError {
                field: "history_limit",
                message: "must be greater than zero".into(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed or invalid.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }
}

/// Serialize [`Tz`] by its IANA name.
pub mod timezone_serde {
    use chrono_tz::Tz;
    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize a timezone as its IANA name.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S>(tz: &Tz, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(tz.name())
    }

    /// Deserialize a timezone from its IANA name.
    ///
    /// # Errors
    ///
    /// Fails for unknown timezone names.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Tz, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
