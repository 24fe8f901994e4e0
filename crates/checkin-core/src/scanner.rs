//! Proximity scanner seam.
//!
//! Radio scanning, frame parsing and distance estimation happen outside this
//! crate. A [`ProximityScanner`] accepts region registrations and reports
//! events through a [`ScannerSubscription`]: inside/outside transitions per
//! region and, while ranging, snapshots of the visible beacons.
//!
//! [`ChannelScanner`] is an in-process implementation: the host pushes the
//! events it receives from its platform scanner through a [`ScannerFeed`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::region::Region;
use crate::sighting::RawSighting;
use crate::types::Presence;

/// Scanner-specific errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScannerError {
    /// The scanner cannot service requests.
    #[error("Scanner unavailable: {0}")]
    Unavailable(String),

    /// Nobody is subscribed to scanner events.
    #[error("No active scanner subscription")]
    NotSubscribed,

    /// An event referenced a region that is not monitored.
    #[error("Region '{0}' is not monitored")]
    NotMonitored(String),

    /// A ranging snapshot arrived for a region that is not being ranged.
    #[error("Region '{0}' is not being ranged")]
    NotRanging(String),
}

/// Event reported by a scanner. Regions are identified by [`Region::token`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScannerEvent {
    /// The device crossed a region boundary.
    RegionState {
        /// Region token.
        region: String,
        /// New presence.
        presence: Presence,
    },
    /// Beacons currently visible in a ranged region.
    Ranged {
        /// Region token.
        region: String,
        /// Visible beacons.
        beacons: Vec<RawSighting>,
    },
}

/// Receiving end of scanner events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ScannerSubscription {
    receiver: mpsc::UnboundedReceiver<ScannerEvent>,
}

impl ScannerSubscription {
    /// Wrap a receiver.
    #[must_use]
    pub const fn new(receiver: mpsc::UnboundedReceiver<ScannerEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event. `None` once the scanner side is gone.
    pub async fn next(&mut self) -> Option<ScannerEvent> {
        self.receiver.recv().await
    }

    /// Take an already queued event without waiting.
    pub fn try_next(&mut self) -> Option<ScannerEvent> {
        self.receiver.try_recv().ok()
    }
}

/// External proximity scanning capability.
pub trait ProximityScanner: Send + Sync {
    /// Begin watching a region for enter/exit transitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the scanner cannot monitor the region.
    fn start_monitoring(&self, region: &Region) -> Result<(), ScannerError>;

    /// Begin reporting visible beacons in a region.
    ///
    /// # Errors
    ///
    /// Returns an error if the scanner cannot range the region.
    fn start_ranging(&self, region: &Region) -> Result<(), ScannerError>;

    /// Stop reporting visible beacons in a region.
    ///
    /// # Errors
    ///
    /// Returns an error if the scanner rejects the request.
    fn stop_ranging(&self, region: &Region) -> Result<(), ScannerError>;

    /// Open the event stream. A new subscription replaces the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the scanner cannot deliver events.
    fn subscribe(&self) -> Result<ScannerSubscription, ScannerError>;
}

#[derive(Debug, Default)]
struct ChannelState {
    sender: Option<mpsc::UnboundedSender<ScannerEvent>>,
    monitored: BTreeSet<String>,
    ranging: BTreeSet<String>,
}

/// Scanner driven by events pushed through a [`ScannerFeed`].
#[derive(Debug, Clone, Default)]
pub struct ChannelScanner {
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelScanner {
    /// Create a scanner with nothing monitored.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for pushing events into this scanner.
    #[must_use]
    pub fn feed(&self) -> ScannerFeed {
        ScannerFeed {
            state: Arc::clone(&self.state),
        }
    }

    /// Tokens of monitored regions.
    #[must_use]
    pub fn monitored_regions(&self) -> Vec<String> {
        self.with_state(|state| state.monitored.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Tokens of regions currently being ranged.
    #[must_use]
    pub fn ranging_regions(&self) -> Vec<String> {
        self.with_state(|state| state.ranging.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a subscriber is attached.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.with_state(|state| state.sender.as_ref().is_some_and(|s| !s.is_closed()))
            .unwrap_or(false)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ChannelState) -> T) -> Result<T, ScannerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ScannerError::Unavailable("scanner state poisoned".into()))?;
        Ok(f(&mut state))
    }
}

impl ProximityScanner for ChannelScanner {
    fn start_monitoring(&self, region: &Region) -> Result<(), ScannerError> {
        self.with_state(|state| {
            state.monitored.insert(region.token());
        })
    }

    fn start_ranging(&self, region: &Region) -> Result<(), ScannerError> {
        self.with_state(|state| {
            state.ranging.insert(region.token());
        })
    }

    fn stop_ranging(&self, region: &Region) -> Result<(), ScannerError> {
        self.with_state(|state| {
            state.ranging.remove(&region.token());
        })
    }

    fn subscribe(&self) -> Result<ScannerSubscription, ScannerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.with_state(|state| state.sender = Some(sender))?;
        Ok(ScannerSubscription::new(receiver))
    }
}

/// Pushes platform scanner events into a [`ChannelScanner`].
///
/// Enforces the scanner contract: transitions only for monitored regions,
/// snapshots only for ranged regions.
#[derive(Debug, Clone)]
pub struct ScannerFeed {
    state: Arc<Mutex<ChannelState>>,
}

impl ScannerFeed {
    /// Report a region transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is not monitored or nobody is subscribed.
    pub fn region_state(&self, region: &str, presence: Presence) -> Result<(), ScannerError> {
        self.send(ScannerEvent::RegionState {
            region: region.to_string(),
            presence,
        })
    }

    /// Report a ranging snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the region is not ranged or nobody is subscribed.
    pub fn ranged(&self, region: &str, beacons: Vec<RawSighting>) -> Result<(), ScannerError> {
        self.send(ScannerEvent::Ranged {
            region: region.to_string(),
            beacons,
        })
    }

    /// Report an arbitrary event.
    ///
    /// # Errors
    ///
    /// See [`ScannerFeed::region_state`] and [`ScannerFeed::ranged`].
    pub fn send(&self, event: ScannerEvent) -> Result<(), ScannerError> {
        let state = self
            .state
            .lock()
            .map_err(|_| ScannerError::Unavailable("scanner state poisoned".into()))?;

        match &event {
            ScannerEvent::RegionState { region, .. } if !state.monitored.contains(region) => {
                return Err(ScannerError::NotMonitored(region.clone()));
            }
            ScannerEvent::Ranged { region, .. } if !state.ranging.contains(region) => {
                return Err(ScannerError::NotRanging(region.clone()));
            }
            _ => {}
        }

        let sender = state.sender.as_ref().ok_or(ScannerError::NotSubscribed)?;
        sender.send(event).map_err(|_| ScannerError::NotSubscribed)?;
        debug!("Scanner event forwarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn region(id: i64) -> Region {
        Region::new(
            id,
            Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap(),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let scanner = ChannelScanner::new();
        let feed = scanner.feed();
        let region = region(1);

        scanner.start_monitoring(&region).unwrap();
        let mut subscription = scanner.subscribe().unwrap();
        assert!(scanner.is_subscribed());

        feed.region_state(&region.token(), Presence::Inside).unwrap();
        assert_eq!(
            subscription.next().await,
            Some(ScannerEvent::RegionState {
                region: region.token(),
                presence: Presence::Inside
            })
        );
        assert_eq!(subscription.try_next(), None);

        feed.region_state(&region.token(), Presence::Outside).unwrap();
        assert!(subscription.try_next().is_some());
    }

    #[test]
    fn test_feed_enforces_scanner_contract() {
        let scanner = ChannelScanner::new();
        let feed = scanner.feed();
        let region = region(2);
        let _subscription = scanner.subscribe().unwrap();

        assert_eq!(
            feed.region_state(&region.token(), Presence::Inside),
            Err(ScannerError::NotMonitored(region.token()))
        );

        scanner.start_monitoring(&region).unwrap();
        assert_eq!(
            feed.ranged(&region.token(), Vec::new()),
            Err(ScannerError::NotRanging(region.token()))
        );

        scanner.start_ranging(&region).unwrap();
        assert_eq!(scanner.ranging_regions(), vec![region.token()]);
        assert!(feed.ranged(&region.token(), Vec::new()).is_ok());

        scanner.stop_ranging(&region).unwrap();
        assert!(scanner.ranging_regions().is_empty());
        assert_eq!(scanner.monitored_regions(), vec![region.token()]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let scanner = ChannelScanner::new();
        let feed = scanner.feed();
        let region = region(3);
        scanner.start_monitoring(&region).unwrap();

        assert_eq!(
            feed.region_state(&region.token(), Presence::Outside),
            Err(ScannerError::NotSubscribed)
        );

        let subscription = scanner.subscribe().unwrap();
        drop(subscription);
        assert!(!scanner.is_subscribed());
        assert_eq!(
            feed.region_state(&region.token(), Presence::Outside),
            Err(ScannerError::NotSubscribed)
        );
    }
}
