//! Region catalog: monitored regions and the uniqueness throttle.
//!
//! Both are fetched from the backend in parallel. Neither failure is fatal:
//! a bad throttle falls back to the default, a failed region fetch yields no
//! regions (monitoring does not start for this session).

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{CheckinError, Result};
use crate::region::Region;
use crate::transport::{endpoints, Transport};

/// Minimum time between recorded sightings of the same beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UniquenessThrottle(u64);

impl UniquenessThrottle {
    /// Throttle of `ms` milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Throttle in milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl Default for UniquenessThrottle {
    fn default() -> Self {
        Self(crate::config::DEFAULT_THROTTLE_MS)
    }
}

/// Result of a catalog fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSnapshot {
    /// Regions returned by the backend, in backend order.
    pub regions: Vec<Region>,
    /// Throttle to apply to sightings.
    pub throttle: UniquenessThrottle,
}

/// Fetches regions and throttle configuration from the backend.
pub struct RegionCatalog {
    transport: Arc<dyn Transport>,
    default_throttle: UniquenessThrottle,
}

impl RegionCatalog {
    /// Create a catalog using `default_throttle` when the backend has none.
    pub fn new(transport: Arc<dyn Transport>, default_throttle: UniquenessThrottle) -> Self {
        Self {
            transport,
            default_throttle,
        }
    }

    /// Fetch regions and throttle. Never fails, see the module docs.
    pub async fn fetch(&self) -> CatalogSnapshot {
        let (regions, throttle) = tokio::join!(self.fetch_regions(), self.fetch_throttle());

        let regions = regions.unwrap_or_else(|e| {
            error!(error = %e, "Beacon regions unavailable, monitoring will not start");
            Vec::new()
        });
        let throttle = throttle.unwrap_or_else(|e| {
            warn!(
                error = %e,
                default_ms = self.default_throttle.as_millis(),
                "Using default uniqueness throttle"
            );
            self.default_throttle
        });

        info!(
            regions = regions.len(),
            throttle_ms = throttle.as_millis(),
            "Beacon catalog fetched"
        );
        CatalogSnapshot { regions, throttle }
    }

    /// Fetch the region list.
    ///
    /// # Errors
    ///
    /// Returns `CatalogFetchError` if the request fails or the payload has no
    /// region array.
    pub async fn fetch_regions(&self) -> Result<Vec<Region>> {
        let envelope = self
            .transport
            .get(endpoints::BEACON_REGIONS)
            .await
            .map_err(|e| CheckinError::CatalogFetchError {
                code: e.code,
                message: e.message,
            })?;
        parse_regions(&envelope)
    }

    /// Fetch the uniqueness throttle.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request fails, `ConfigParseError` if
    /// the value is missing or malformed.
    pub async fn fetch_throttle(&self) -> Result<UniquenessThrottle> {
        let envelope = self.transport.get(endpoints::SITE_DETAILS).await?;
        parse_throttle(&envelope)
    }
}

/// Extract regions from a `beacon_regions` envelope.
///
/// Entries that do not decode are skipped with a warning.
///
/// # Errors
///
/// Returns `CatalogFetchError` if `data` is not an array.
pub fn parse_regions(envelope: &Value) -> Result<Vec<Region>> {
    let entries = envelope
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| CheckinError::CatalogFetchError {
            code: 200,
            message: "response has no region array".into(),
        })?;

    let regions = entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<Region>(entry.clone()) {
            Ok(region) => Some(region),
            Err(e) => {
                warn!(error = %e, entry = %entry, "Skipping malformed beacon region");
                None
            }
        })
        .collect::<Vec<_>>();

    debug!(received = entries.len(), parsed = regions.len(), "Beacon regions parsed");
    Ok(regions)
}

/// Extract the throttle from a `site_details/sdk` envelope.
///
/// The backend sends `data.beacons.uniqueness_throttle` in seconds, as a
/// number or a numeric string.
///
/// # Errors
///
/// Returns `ConfigParseError` if the value is missing, negative or not numeric.
pub fn parse_throttle(envelope: &Value) -> Result<UniquenessThrottle> {
    let raw = envelope
        .pointer("/data/beacons/uniqueness_throttle")
        .ok_or_else(|| CheckinError::ConfigParseError("uniqueness_throttle missing".into()))?;

    let seconds = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite() && *s >= 0.0)
    .ok_or_else(|| CheckinError::ConfigParseError(format!("invalid uniqueness_throttle {raw}")))?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let millis = (seconds * 1000.0).round() as u64;
    Ok(UniquenessThrottle::from_millis(millis))
}
