//! # checkin-core
//!
//! Beacon proximity event pipeline.
//!
//! Turns raw, high-frequency beacon sightings reported by an external
//! proximity scanner into a deduplicated, persisted and reliably delivered
//! stream of region transitions and range sightings.
//!
//! ## Architecture
//!
//! - [`catalog`] - Monitored regions and the uniqueness throttle, fetched from the backend
//! - [`monitor`] - Region enter/exit state machine, region action reports, ranging control
//! - [`recorder`] - Sighting deduplication against a bounded history
//! - [`delivery`] - Pending queue delivery with a single retry deadline
//! - [`pipeline`] - Per-instance actor tying the above together
//! - [`scanner`] - Proximity scanner seam and the channel-fed implementation
//! - [`storage`] - Namespaced key/value persistence of history and pending queue
//! - [`transport`] - Backend request/response seam and the HTTP implementation
//! - [`config`] - Per-instance settings
//! - [`error`] - Unified error types for the crate
//! - [`region`], [`sighting`], [`types`] - Data model
//!
//! ## Example
//!
//! ```
//! use checkin_core::Proximity;
//!
//! assert_eq!(Proximity::from_distance(7.0), Proximity::Near);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod catalog;
pub mod config;
pub mod delivery;
pub mod error;
#[cfg(any(test, feature = "mock-transport"))]
pub mod mock;
pub mod monitor;
pub mod pipeline;
pub mod recorder;
pub mod region;
pub mod scanner;
pub mod sighting;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
pub use catalog::{CatalogSnapshot, RegionCatalog, UniquenessThrottle};
pub use config::{ConfigError, ConfigResult, SdkConfig};
pub use delivery::{DeliveryManager, DeliveryOutcome};
pub use error::{CheckinError, Result};
#[cfg(any(test, feature = "mock-transport"))]
pub use mock::{MockTransport, RecordedRequest};
pub use monitor::{BeaconEventHandler, LoggingEventHandler, RegionMonitor};
pub use pipeline::{PipelineHandle, PipelineStatus, ProximityPipeline};
pub use recorder::SightingRecorder;
pub use region::{Region, RegionError};
pub use scanner::{
    ChannelScanner, ProximityScanner, ScannerError, ScannerEvent, ScannerFeed, ScannerSubscription,
};
pub use sighting::{RangeSighting, RawSighting, WireSighting};
pub use storage::{default_data_dir, FileStore, KeyValueStore, MemoryStore, SightingStore, StoreError};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{Transport, TransportError, TransportResult};
pub use types::{BeaconKey, MonitoringState, Presence, Proximity, RegionAction, RegionId};
