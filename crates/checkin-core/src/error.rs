//! Unified error types for the checkin core library.
//!
//! Each module has its own error type ([`ConfigError`], [`StoreError`],
//! [`TransportError`], [`ScannerError`]); [`CheckinError`] unifies them and
//! names the pipeline's failure modes.
//!
//! Pipeline failures never cross the SDK boundary. They are logged where they
//! happen and the pipeline degrades:
//!
//! | failure | outcome |
//! |---|---|
//! | [`CheckinError::ConfigParseError`] | default throttle applied |
//! | [`CheckinError::CatalogFetchError`] | no regions monitored this session |
//! | [`CheckinError::DeliveryError`] | queue persisted, one retry scheduled |
//! | [`CheckinError::TelemetryError`] | logged and dropped |
//!
//! Only construction-time failures (invalid configuration, unusable storage
//! or transport) are returned to the host.
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`StoreError`]: crate::storage::StoreError
//! [`TransportError`]: crate::transport::TransportError
//! [`ScannerError`]: crate::scanner::ScannerError

use thiserror::Error;

/// The unified error type for all checkin operations.
#[derive(Debug, Error)]
pub enum CheckinError {
    // =========================================================================
    // BACKEND ERRORS
    // =========================================================================
    /// The backend throttle configuration was missing or malformed.
    #[error("Malformed uniqueness throttle configuration: {0}")]
    ConfigParseError(String),

    /// The region list could not be fetched.
    #[error("Failed to fetch beacon regions ({code}): {message}")]
    CatalogFetchError {
        /// Backend or HTTP status, 0 for network failures.
        code: i64,
        /// Backend message.
        message: String,
    },

    /// A sighting batch could not be delivered.
    #[error("Failed to deliver {count} beacon range actions ({code}): {message}")]
    DeliveryError {
        /// Number of sightings in the failed batch.
        count: usize,
        /// Backend or HTTP status, 0 for network failures.
        code: i64,
        /// Backend message.
        message: String,
    },

    /// A region enter/exit report could not be delivered.
    #[error("Failed to report region {action} for region {region_id} ({code}): {message}")]
    TelemetryError {
        /// Region the report was for.
        region_id: i64,
        /// `enter` or `exit`.
        action: &'static str,
        /// Backend or HTTP status, 0 for network failures.
        code: i64,
        /// Backend message.
        message: String,
    },

    /// Any other backend call failure.
    #[error("Backend request failed ({code}): {message}")]
    TransportError {
        /// Backend or HTTP status, 0 for network failures.
        code: i64,
        /// Backend message.
        message: String,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found.
    #[error("Configuration file not found at: {0}")]
    ConfigNotFound(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Persisted data could not be decoded.
    #[error("Corrupt persisted data: {0}")]
    CorruptData(String),

    // =========================================================================
    // SCANNER & LIFECYCLE ERRORS
    // =========================================================================
    /// The proximity scanner rejected a request.
    #[error("Proximity scanner error: {0}")]
    ScannerError(String),

    /// The pipeline task has stopped.
    #[error("Pipeline for '{0}' is no longer running")]
    PipelineStopped(String),
}

/// A specialized [`Result`] type for checkin operations.
pub type Result<T> = std::result::Result<T, CheckinError>;

impl CheckinError {
    /// Returns `true` if this error came from a backend call.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::CatalogFetchError { .. }
                | Self::DeliveryError { .. }
                | Self::TelemetryError { .. }
                | Self::TransportError { .. }
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigNotFound(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to persisted state.
    #[inline]
    #[must_use]
    pub const fn is_persistence_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::CorruptData(_))
    }

    /// Returns `true` if the pipeline recovers from this error on its own.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_)
                | Self::DeliveryError { .. }
                | Self::TelemetryError { .. }
                | Self::TransportError { .. }
        )
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::CatalogFetchError { .. } => "CATALOG_FETCH_ERROR",
            Self::DeliveryError { .. } => "DELIVERY_ERROR",
            Self::TelemetryError { .. } => "TELEMETRY_ERROR",
            Self::TransportError { .. } => "TRANSPORT_ERROR",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::CorruptData(_) => "CORRUPT_DATA",
            Self::ScannerError(_) => "SCANNER_ERROR",
            Self::PipelineStopped(_) => "PIPELINE_STOPPED",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for CheckinError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigValidationError(e.to_string()),
            ConfigError::SerializeError(e) => Self::PersistenceError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::storage::StoreError> for CheckinError {
    fn from(err: crate::storage::StoreError) -> Self {
        use crate::storage::StoreError;
        match err {
            StoreError::Corrupt { key, source } => Self::CorruptData(format!("{key}: {source}")),
            other => Self::PersistenceError(other.to_string()),
        }
    }
}

impl From<crate::transport::TransportError> for CheckinError {
    fn from(err: crate::transport::TransportError) -> Self {
        Self::TransportError {
            code: err.code,
            message: err.message,
        }
    }
}

impl From<crate::scanner::ScannerError> for CheckinError {
    fn from(err: crate::scanner::ScannerError) -> Self {
        Self::ScannerError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::storage::StoreError;
    use crate::transport::TransportError;

    #[test]
    fn test_transport_error_classification() {
        let catalog = CheckinError::CatalogFetchError {
            code: 500,
            message: "boom".into(),
        };
        assert!(catalog.is_transport_error());
        assert!(!catalog.is_recoverable());

        let delivery = CheckinError::DeliveryError {
            count: 3,
            code: 0,
            message: "offline".into(),
        };
        assert!(delivery.is_transport_error());
        assert!(delivery.is_recoverable());

        assert!(!CheckinError::PersistenceError("disk".into()).is_transport_error());
    }

    #[test]
    fn test_config_and_persistence_classification() {
        assert!(CheckinError::ConfigParseError("x".into()).is_config_error());
        assert!(CheckinError::ConfigValidationError("x".into()).is_config_error());
        assert!(CheckinError::CorruptData("x".into()).is_persistence_error());
        assert!(!CheckinError::ScannerError("x".into()).is_persistence_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CheckinError::ConfigParseError("x".into()).error_code(),
            "CONFIG_PARSE_ERROR"
        );
        assert_eq!(
            CheckinError::PipelineStopped("t".into()).error_code(),
            "PIPELINE_STOPPED"
        );
    }

    #[test]
    fn test_display_messages() {
        let err = CheckinError::TelemetryError {
            region_id: 4,
            action: "enter",
            code: 503,
            message: "unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to report region enter for region 4 (503): unavailable"
        );
    }

    #[test]
    fn test_from_module_errors() {
        let err: CheckinError = TransportError::new(404, "missing").into();
        assert!(matches!(err, CheckinError::TransportError { code: 404, .. }));

        let err: CheckinError = ConfigError::ValidationError {
            field: "api_token",
            message: "must not be empty".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Configuration validation failed: api_token: must not be empty"
        );

        let err: CheckinError = StoreError::Poisoned.into();
        assert!(err.is_persistence_error());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CheckinError>();
        assert_sync::<CheckinError>();
    }
}
