//! JSON-lines scanner event feed.
//!
//! Each non-blank line not starting with `#` is one event:
//!
//! ```text
//! {"type":"region_state","region":7,"state":"inside"}
//! {"type":"ranged","region":"checkin-region-7","beacons":[
//!     {"uuid":"f7826da6-4fa2-4e98-8024-bc5b71e0893e","major":1,"minor":2,"rssi":-60,"distance":2.5}]}
//! ```
//!
//! Regions are given by backend id or scanner token. Beacons without
//! `seen_at_ms` are stamped when the line is read. Events are replayed in
//! order; after each transition the pump waits for the pipeline to apply it,
//! so a following snapshot finds ranging already started.

use std::path::Path;

use checkin_core::region::REGION_TOKEN_PREFIX;
use checkin_core::{Presence, RawSighting, RegionId, ScannerEvent};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::state::{AgentError, AgentState};

/// Region reference in a feed line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RegionRef {
    /// Backend region id.
    Id(RegionId),
    /// Scanner region token.
    Token(String),
}

impl RegionRef {
    /// Scanner token of the region.
    #[must_use]
    pub fn token(&self) -> String {
        match self {
            Self::Id(id) => format!("{REGION_TOKEN_PREFIX}{id}"),
            Self::Token(token) => token.clone(),
        }
    }
}

/// One feed line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// Region boundary crossing.
    RegionState {
        /// Region crossed.
        region: RegionRef,
        /// New presence.
        state: Presence,
    },
    /// Ranging snapshot.
    Ranged {
        /// Ranged region.
        region: RegionRef,
        /// Visible beacons.
        beacons: Vec<RawSighting>,
    },
}

impl From<FeedEvent> for ScannerEvent {
    fn from(event: FeedEvent) -> Self {
        match event {
            FeedEvent::RegionState { region, state } => Self::RegionState {
                region: region.token(),
                presence: state,
            },
            FeedEvent::Ranged { region, beacons } => Self::Ranged {
                region: region.token(),
                beacons,
            },
        }
    }
}

/// Counters from one feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Events handed to the scanner.
    pub forwarded: usize,
    /// Lines that did not parse.
    pub malformed: usize,
    /// Events the scanner refused.
    pub rejected: usize,
}

/// Parse a feed line. `None` for blank lines and comments.
#[must_use]
pub fn parse_line(line: &str) -> Option<serde_json::Result<FeedEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Replay a feed file (`-` for stdin) into `instance`.
///
/// # Errors
///
/// Returns an error if the feed cannot be read or the instance stops.
pub async fn pump_path(
    path: &Path,
    instance: &str,
    state: &AgentState,
) -> Result<FeedStats, AgentError> {
    if path == Path::new("-") {
        return pump(BufReader::new(tokio::io::stdin()), instance, state).await;
    }

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| AgentError::Feed {
            instance: instance.to_string(),
            source,
        })?;
    pump(BufReader::new(file), instance, state).await
}

/// Replay feed lines from `reader` into `instance`.
///
/// Malformed lines and events the scanner refuses are logged and skipped.
///
/// # Errors
///
/// Returns an error if reading fails or the instance stops.
pub async fn pump<R>(reader: R, instance: &str, state: &AgentState) -> Result<FeedStats, AgentError>
where
    R: AsyncBufRead + Unpin,
{
    let feed = state.feed(instance).await?;
    // monitoring is registered once start-up has finished
    state.status(instance).await?;

    let mut stats = FeedStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.map_err(|source| AgentError::Feed {
        instance: instance.to_string(),
        source,
    })? {
        line_no += 1;
        let event = match parse_line(&line) {
            None => continue,
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(instance, line = line_no, error = %e, "Skipping malformed feed line");
                stats.malformed += 1;
                continue;
            }
        };

        let is_transition = matches!(event, FeedEvent::RegionState { .. });
        if let Err(e) = feed.send(event.into()) {
            warn!(instance, line = line_no, error = %e, "Scanner refused feed event");
            stats.rejected += 1;
            continue;
        }
        stats.forwarded += 1;
        debug!(instance, line = line_no, "Feed event forwarded");

        if is_transition {
            state.status(instance).await?;
        }
    }

    info!(
        instance,
        forwarded = stats.forwarded,
        malformed = stats.malformed,
        rejected = stats.rejected,
        "Feed finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::InstanceConfig;
    use checkin_core::transport::endpoints;
    use checkin_core::{MemoryStore, MockTransport, MonitoringState, SdkConfig};
    use serde_json::json;

    const UUID: &str = "f7826da6-4fa2-4e98-8024-bc5b71e0893e";

    async fn running(transport: &MockTransport) -> AgentState {
        transport.respond(
            endpoints::BEACON_REGIONS,
            Ok(json!({ "status": 200, "data": [{ "id": 7, "uuid": UUID, "major": "1" }] })),
        );
        let state = AgentState::new();
        state
            .start_instance(
                &InstanceConfig {
                    name: "arena".into(),
                    sdk: SdkConfig::new("token-a"),
                    feed: None,
                },
                Arc::new(transport.clone()),
                Arc::new(MemoryStore::new()),
            )
            .await
            .unwrap();
        state
    }

    #[test]
    fn test_parse_region_state_by_id_or_token() {
        let by_id = parse_line(r#"{"type":"region_state","region":7,"state":"inside"}"#)
            .unwrap()
            .unwrap();
        let by_token =
            parse_line(r#"{"type":"region_state","region":"checkin-region-7","state":"inside"}"#)
                .unwrap()
                .unwrap();

        assert_eq!(
            ScannerEvent::from(by_id),
            ScannerEvent::from(by_token),
        );
    }

    #[test]
    fn test_parse_ranged() {
        let event = parse_line(&format!(
            r#"{{"type":"ranged","region":7,"beacons":[{{"uuid":"{UUID}","major":1,"minor":"2","rssi":-60,"distance":2.5,"seen_at_ms":1000}}]}}"#
        ))
        .unwrap()
        .unwrap();

        let FeedEvent::Ranged { region, beacons } = event else {
            panic!("expected a ranging snapshot");
        };
        assert_eq!(region, RegionRef::Id(7));
        assert_eq!(beacons.len(), 1);
        assert_eq!(beacons[0].minor, 2);
        assert_eq!(beacons[0].seen_at_ms, 1000);
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("# replay of gate 3").is_none());
        assert!(parse_line("{not json").unwrap().is_err());
    }

    #[tokio::test]
    async fn test_pump_drives_pipeline() {
        let transport = MockTransport::new();
        let state = running(&transport).await;
        let feed = format!(
            r#"
# gate 7
{{"type":"region_state","region":7,"state":"inside"}}
{{"type":"ranged","region":7,"beacons":[{{"uuid":"{UUID}","major":1,"minor":2,"rssi":-60,"distance":2.5,"seen_at_ms":1000}},{{"uuid":"{UUID}","major":1,"minor":2,"rssi":-61,"distance":2.4,"seen_at_ms":2000}}]}}
{{"type":"ranged","region":99,"beacons":[]}}
garbage
"#
        );

        let stats = tokio_test::assert_ok!(pump(feed.as_bytes(), "arena", &state).await);
        assert_eq!(
            stats,
            FeedStats {
                forwarded: 2,
                malformed: 1,
                rejected: 1,
            }
        );

        let status = tokio_test::assert_ok!(state.status("arena").await);
        assert_eq!(
            status.regions.get(&7),
            Some(&MonitoringState::Monitoring(Some(Presence::Inside)))
        );
        assert_eq!(status.history_len, 1);
        assert_eq!(transport.requests_to(endpoints::REGION_ACTIONS).len(), 1);
        assert_eq!(transport.requests_to(endpoints::RANGE_ACTIONS).len(), 1);

        state.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_pump_missing_file() {
        let transport = MockTransport::new();
        let state = running(&transport).await;
        let dir = tempfile::tempdir().unwrap();

        let err = tokio_test::assert_err!(
            pump_path(&dir.path().join("absent.jsonl"), "arena", &state).await
        );
        assert!(matches!(err, AgentError::Feed { .. }));

        state.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_pump_unknown_instance() {
        let state = AgentState::new();
        let err = tokio_test::assert_err!(pump(&b""[..], "nowhere", &state).await);
        assert!(matches!(err, AgentError::UnknownInstance(_)));
    }
}
