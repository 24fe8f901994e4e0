//! Region enter/exit state machine.
//!
//! Each catalog region moves from `Unmonitored` to `Monitoring` once it is
//! registered with the scanner. From then on every presence signal that
//! differs from the current one is a transition:
//!
//! - `Inside`: report `enter`, notify the handler, start ranging.
//! - `Outside`: report `exit`, notify the handler, stop ranging.
//!
//! A signal repeating the current presence is ignored. Reports are
//! best-effort: each is posted once in the background and dropped on failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::CheckinError;
use crate::region::Region;
use crate::scanner::ProximityScanner;
use crate::transport::{endpoints, Transport};
use crate::types::{MonitoringState, Presence, RegionAction, RegionId};

/// Application callbacks for region events. Every method defaults to logging.
pub trait BeaconEventHandler: Send + Sync {
    /// The catalog delivered its regions.
    fn on_regions_received(&self, regions: &[Region]) {
        let names: Vec<String> = regions.iter().map(ToString::to_string).collect();
        info!(count = regions.len(), regions = ?names, "Beacon regions received");
    }

    /// The device entered `region`.
    fn on_region_enter(&self, region: &Region) {
        info!(region_id = region.id(), "Beacon region ENTER: {region}");
    }

    /// The device left `region`.
    fn on_region_exit(&self, region: &Region) {
        info!(region_id = region.id(), "Beacon region EXIT: {region}");
    }
}

/// Handler that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventHandler;

impl BeaconEventHandler for LoggingEventHandler {}

#[derive(Debug)]
struct MonitoredRegion {
    region: Region,
    state: MonitoringState,
}

/// Owns the per-region monitoring state of one SDK instance.
pub struct RegionMonitor {
    transport: Arc<dyn Transport>,
    scanner: Arc<dyn ProximityScanner>,
    handler: Arc<dyn BeaconEventHandler>,
    regions: BTreeMap<RegionId, MonitoredRegion>,
    tokens: HashMap<String, RegionId>,
    telemetry: JoinSet<()>,
}

impl RegionMonitor {
    /// Create a monitor with no regions.
    pub fn new(
        transport: Arc<dyn Transport>,
        scanner: Arc<dyn ProximityScanner>,
        handler: Arc<dyn BeaconEventHandler>,
    ) -> Self {
        Self {
            transport,
            scanner,
            handler,
            regions: BTreeMap::new(),
            tokens: HashMap::new(),
            telemetry: JoinSet::new(),
        }
    }

    /// Register catalog regions with the scanner.
    ///
    /// Inactive regions and regions already known are skipped; a region the
    /// scanner refuses stays `Unmonitored`. Returns how many regions are now
    /// monitored.
    pub fn start(&mut self, regions: Vec<Region>) -> usize {
        self.handler.on_regions_received(&regions);

        for region in regions {
            if !region.is_active() {
                debug!(region_id = region.id(), "Skipping inactive beacon region");
                continue;
            }
            if self.regions.contains_key(&region.id()) {
                continue;
            }

            let state = match self.scanner.start_monitoring(&region) {
                Ok(()) => MonitoringState::Monitoring(None),
                Err(e) => {
                    warn!(region_id = region.id(), error = %e, "Scanner refused region");
                    MonitoringState::Unmonitored
                }
            };
            self.tokens.insert(region.token(), region.id());
            self.regions
                .insert(region.id(), MonitoredRegion { region, state });
        }

        let monitored = self
            .regions
            .values()
            .filter(|r| r.state != MonitoringState::Unmonitored)
            .count();
        info!(monitored, "Beacon region monitoring started");
        monitored
    }

    /// Apply a presence signal for the region with scanner token `token`.
    ///
    /// Returns the action taken, or `None` when the signal was ignored.
    pub fn on_presence(&mut self, token: &str, presence: Presence) -> Option<RegionAction> {
        let Some(id) = self.tokens.get(token).copied() else {
            debug!(token, "Presence signal for unknown region");
            return None;
        };
        let entry = self.regions.get_mut(&id)?;

        match entry.state {
            MonitoringState::Unmonitored => {
                debug!(region_id = id, "Presence signal for unmonitored region");
                return None;
            }
            MonitoringState::Monitoring(Some(current)) if current == presence => {
                debug!(region_id = id, ?presence, "Repeated presence signal ignored");
                return None;
            }
            MonitoringState::Monitoring(_) => {}
        }
        entry.state = MonitoringState::Monitoring(Some(presence));

        let region = entry.region.clone();
        let action = RegionAction::from(presence);
        self.report(&region, action);

        match action {
            RegionAction::Enter => {
                self.handler.on_region_enter(&region);
                if let Err(e) = self.scanner.start_ranging(&region) {
                    warn!(region_id = id, error = %e, "Failed to start ranging");
                }
            }
            RegionAction::Exit => {
                self.handler.on_region_exit(&region);
                if let Err(e) = self.scanner.stop_ranging(&region) {
                    warn!(region_id = id, error = %e, "Failed to stop ranging");
                }
            }
        }
        Some(action)
    }

    /// Region registered under `token`.
    #[must_use]
    pub fn region(&self, token: &str) -> Option<&Region> {
        let id = self.tokens.get(token)?;
        self.regions.get(id).map(|r| &r.region)
    }

    /// Whether ranging snapshots for `token` should be recorded.
    #[must_use]
    pub fn is_ranging(&self, token: &str) -> bool {
        self.tokens
            .get(token)
            .and_then(|id| self.regions.get(id))
            .is_some_and(|r| r.state.is_inside())
    }

    /// Current state of a region. Unknown regions are `Unmonitored`.
    #[must_use]
    pub fn state(&self, id: RegionId) -> MonitoringState {
        self.regions
            .get(&id)
            .map_or(MonitoringState::Unmonitored, |r| r.state)
    }

    /// Known regions, ordered by id.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values().map(|r| &r.region)
    }

    /// Wait for in-flight region reports.
    pub async fn flush_telemetry(&mut self) {
        while self.telemetry.join_next().await.is_some() {}
    }

    /// Stop ranging everywhere and wait for in-flight reports.
    pub async fn shutdown(&mut self) {
        for entry in self.regions.values().filter(|r| r.state.is_inside()) {
            if let Err(e) = self.scanner.stop_ranging(&entry.region) {
                warn!(region_id = entry.region.id(), error = %e, "Failed to stop ranging");
            }
        }
        self.flush_telemetry().await;
    }

    fn report(&mut self, region: &Region, action: RegionAction) {
        while self.telemetry.try_join_next().is_some() {}

        let transport = Arc::clone(&self.transport);
        let region_id = region.id();
        self.telemetry.spawn(async move {
            let body = json!({
                "beacon_region_id": region_id.to_string(),
                "action_type": action.as_str(),
            });
            match transport.post(endpoints::REGION_ACTIONS, body).await {
                Ok(_) => debug!(region_id, %action, "Region action reported"),
                Err(e) => {
                    let error = CheckinError::TelemetryError {
                        region_id,
                        action: action.as_str(),
                        code: e.code,
                        message: e.message,
                    };
                    warn!(error = %error, "Region action dropped");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::mock::MockTransport;
    use crate::scanner::ChannelScanner;
    use crate::transport::TransportError;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<String>>,
    }

    impl BeaconEventHandler for RecordingHandler {
        fn on_regions_received(&self, regions: &[Region]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("received:{}", regions.len()));
        }

        fn on_region_enter(&self, region: &Region) {
            self.events
                .lock()
                .unwrap()
                .push(format!("enter:{}", region.id()));
        }

        fn on_region_exit(&self, region: &Region) {
            self.events
                .lock()
                .unwrap()
                .push(format!("exit:{}", region.id()));
        }
    }

    fn region(id: RegionId) -> Region {
        Region::new(
            id,
            Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap(),
            Some(1),
            None,
        )
    }

    struct Fixture {
        monitor: RegionMonitor,
        transport: MockTransport,
        scanner: ChannelScanner,
        handler: Arc<RecordingHandler>,
    }

    fn fixture() -> Fixture {
        let transport = MockTransport::new();
        let scanner = ChannelScanner::new();
        let handler = Arc::new(RecordingHandler::default());
        let monitor = RegionMonitor::new(
            Arc::new(transport.clone()),
            Arc::new(scanner.clone()),
            handler.clone(),
        );
        Fixture {
            monitor,
            transport,
            scanner,
            handler,
        }
    }

    fn actions(transport: &MockTransport) -> Vec<String> {
        transport
            .requests_to(endpoints::REGION_ACTIONS)
            .iter()
            .map(|r| r.body.as_ref().unwrap()["action_type"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_start_registers_active_regions() {
        let mut f = fixture();
        let inactive = region(3).with_active(false);

        let monitored = f.monitor.start(vec![region(1), region(2), inactive]);

        assert_eq!(monitored, 2);
        assert_eq!(
            f.scanner.monitored_regions(),
            vec!["checkin-region-1".to_string(), "checkin-region-2".to_string()]
        );
        assert_eq!(f.monitor.state(1), MonitoringState::Monitoring(None));
        assert_eq!(f.monitor.state(3), MonitoringState::Unmonitored);
        assert_eq!(f.handler.events.lock().unwrap().as_slice(), ["received:3"]);
    }

    #[tokio::test]
    async fn test_enter_reports_once_and_starts_ranging() {
        let mut f = fixture();
        f.monitor.start(vec![region(1)]);

        assert_eq!(
            f.monitor.on_presence("checkin-region-1", Presence::Outside),
            Some(RegionAction::Exit)
        );
        assert_eq!(
            f.monitor.on_presence("checkin-region-1", Presence::Inside),
            Some(RegionAction::Enter)
        );
        // repeated Inside without an intervening Outside
        assert_eq!(f.monitor.on_presence("checkin-region-1", Presence::Inside), None);
        f.monitor.flush_telemetry().await;

        assert_eq!(actions(&f.transport), ["exit", "enter"]);
        assert_eq!(f.scanner.ranging_regions(), vec!["checkin-region-1".to_string()]);
        assert!(f.monitor.is_ranging("checkin-region-1"));

        let body = f.transport.requests_to(endpoints::REGION_ACTIONS)[1]
            .body
            .clone()
            .unwrap();
        assert_eq!(body["beacon_region_id"], "1");
    }

    #[tokio::test]
    async fn test_first_signal_is_actionable() {
        let mut f = fixture();
        f.monitor.start(vec![region(1)]);

        assert_eq!(
            f.monitor.on_presence("checkin-region-1", Presence::Outside),
            Some(RegionAction::Exit)
        );
        f.monitor.flush_telemetry().await;
        assert_eq!(actions(&f.transport), ["exit"]);
        assert_eq!(
            f.handler.events.lock().unwrap().as_slice(),
            ["received:1", "exit:1"]
        );
    }

    #[tokio::test]
    async fn test_exit_stops_ranging() {
        let mut f = fixture();
        f.monitor.start(vec![region(1)]);

        f.monitor.on_presence("checkin-region-1", Presence::Inside);
        f.monitor.on_presence("checkin-region-1", Presence::Outside);
        f.monitor.flush_telemetry().await;

        assert!(f.scanner.ranging_regions().is_empty());
        assert!(!f.monitor.is_ranging("checkin-region-1"));
        assert_eq!(
            f.monitor.state(1),
            MonitoringState::Monitoring(Some(Presence::Outside))
        );
        assert_eq!(
            f.handler.events.lock().unwrap().as_slice(),
            ["received:1", "enter:1", "exit:1"]
        );
    }

    #[tokio::test]
    async fn test_unknown_region_is_ignored() {
        let mut f = fixture();
        f.monitor.start(vec![region(1)]);

        assert_eq!(f.monitor.on_presence("checkin-region-99", Presence::Inside), None);
        f.monitor.flush_telemetry().await;
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_report_still_transitions() {
        let mut f = fixture();
        f.transport
            .respond(endpoints::REGION_ACTIONS, Err(TransportError::new(500, "down")));
        f.monitor.start(vec![region(1)]);

        assert_eq!(
            f.monitor.on_presence("checkin-region-1", Presence::Inside),
            Some(RegionAction::Enter)
        );
        f.monitor.flush_telemetry().await;

        // attempted exactly once, never retried
        assert_eq!(actions(&f.transport), ["enter"]);
        assert!(f.monitor.is_ranging("checkin-region-1"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_ranging() {
        let mut f = fixture();
        f.monitor.start(vec![region(1), region(2)]);
        f.monitor.on_presence("checkin-region-1", Presence::Inside);
        f.monitor.on_presence("checkin-region-2", Presence::Inside);
        assert_eq!(f.scanner.ranging_regions().len(), 2);

        f.monitor.shutdown().await;
        assert!(f.scanner.ranging_regions().is_empty());
        assert_eq!(f.monitor.regions().count(), 2);
    }
}
