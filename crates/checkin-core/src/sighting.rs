//! Beacon range sightings.
//!
//! A [`RangeSighting`] has two serialized forms:
//!
//! - the **storage view** (its own `Serialize`/`Deserialize` impls), used for
//!   the persisted history and pending queue, with `seenAt` as epoch millis;
//! - the **wire view** ([`WireSighting`]), posted to the backend, with
//!   `seen_at` as a formatted timestamp.
//!
//! Both views carry `uuid, major, minor, rssi, distance, proximity, accuracy`.

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{id_string, BeaconKey, Proximity};

/// Accuracy value sent with every sighting. The scanner does not report one.
pub const UNKNOWN_ACCURACY: i32 = -1;

/// Distance recorded when the scanner reports a non-finite estimate.
const UNKNOWN_DISTANCE: f64 = -1.0;

/// Format of the wire `seen_at` field.
const SEEN_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One beacon as reported by a scanner ranging snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSighting {
    /// Proximity namespace UUID.
    pub uuid: Uuid,
    /// Major identifier.
    #[serde(with = "id_string")]
    pub major: u16,
    /// Minor identifier.
    #[serde(with = "id_string")]
    pub minor: u16,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Scanner distance estimate in meters.
    #[serde(rename = "distance")]
    pub distance_m: f64,
    /// When the beacon was seen, epoch milliseconds. Stamped on decode when absent.
    #[serde(default = "now_ms")]
    pub seen_at_ms: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl RawSighting {
    /// Identity of the sighted beacon.
    #[must_use]
    pub const fn key(&self) -> BeaconKey {
        BeaconKey {
            uuid: self.uuid,
            major: self.major,
            minor: self.minor,
        }
    }
}

/// An immutable, classified beacon sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredSighting", into = "StoredSighting")]
pub struct RangeSighting {
    key: BeaconKey,
    rssi: i16,
    distance_m: f64,
    proximity: Proximity,
    seen_at_ms: i64,
}

impl RangeSighting {
    /// Create a sighting, deriving its proximity from `distance_m`.
    #[must_use]
    pub fn new(key: BeaconKey, rssi: i16, distance_m: f64, seen_at_ms: i64) -> Self {
        let distance_m = if distance_m.is_finite() {
            distance_m
        } else {
            UNKNOWN_DISTANCE
        };
        Self {
            key,
            rssi,
            distance_m,
            proximity: Proximity::from_distance(distance_m),
            seen_at_ms,
        }
    }

    /// Identity of the sighted beacon.
    #[must_use]
    pub const fn key(&self) -> BeaconKey {
        self.key
    }

    /// Signal strength in dBm.
    #[must_use]
    pub const fn rssi(&self) -> i16 {
        self.rssi
    }

    /// Distance estimate in meters.
    #[must_use]
    pub const fn distance_m(&self) -> f64 {
        self.distance_m
    }

    /// Derived proximity category.
    #[must_use]
    pub const fn proximity(&self) -> Proximity {
        self.proximity
    }

    /// When the beacon was seen, epoch milliseconds.
    #[must_use]
    pub const fn seen_at_ms(&self) -> i64 {
        self.seen_at_ms
    }

    /// `seen_at` rendered in `tz`, e.g. `2025-01-15 03:30:00.125`.
    ///
    /// Falls back to the raw millisecond value when out of chrono's range.
    #[must_use]
    pub fn seen_at_formatted(&self, tz: Tz) -> String {
        DateTime::from_timestamp_millis(self.seen_at_ms).map_or_else(
            || self.seen_at_ms.to_string(),
            |utc| utc.with_timezone(&tz).format(SEEN_AT_FORMAT).to_string(),
        )
    }

    /// Backend representation of this sighting.
    #[must_use]
    pub fn to_wire(&self, tz: Tz) -> WireSighting {
        WireSighting {
            uuid: self.key.uuid,
            major: self.key.major,
            minor: self.key.minor,
            rssi: self.rssi,
            distance: self.distance_m,
            proximity: self.proximity,
            accuracy: UNKNOWN_ACCURACY,
            seen_at: self.seen_at_formatted(tz),
        }
    }
}

impl From<RawSighting> for RangeSighting {
    fn from(raw: RawSighting) -> Self {
        Self::new(raw.key(), raw.rssi, raw.distance_m, raw.seen_at_ms)
    }
}

/// Wire view of a sighting, as posted to `beacon_range_actions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireSighting {
    /// Proximity namespace UUID.
    pub uuid: Uuid,
    /// Major identifier, as a decimal string.
    #[serde(serialize_with = "id_string::serialize")]
    pub major: u16,
    /// Minor identifier, as a decimal string.
    #[serde(serialize_with = "id_string::serialize")]
    pub minor: u16,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Distance estimate in meters.
    pub distance: f64,
    /// Proximity category.
    pub proximity: Proximity,
    /// Always [`UNKNOWN_ACCURACY`].
    pub accuracy: i32,
    /// Formatted sighting time.
    pub seen_at: String,
}

/// Storage view of a sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSighting {
    uuid: Uuid,
    #[serde(with = "id_string")]
    major: u16,
    #[serde(with = "id_string")]
    minor: u16,
    rssi: i16,
    distance: f64,
    // Recomputed from `distance` on decode.
    #[serde(default, skip_deserializing)]
    proximity: Option<Proximity>,
    #[serde(default = "unknown_accuracy")]
    accuracy: i32,
    #[serde(rename = "seenAt")]
    seen_at: i64,
}

const fn unknown_accuracy() -> i32 {
    UNKNOWN_ACCURACY
}

impl From<StoredSighting> for RangeSighting {
    fn from(stored: StoredSighting) -> Self {
        let key = BeaconKey {
            uuid: stored.uuid,
            major: stored.major,
            minor: stored.minor,
        };
        Self::new(key, stored.rssi, stored.distance, stored.seen_at)
    }
}

impl From<RangeSighting> for StoredSighting {
    fn from(sighting: RangeSighting) -> Self {
        Self {
            uuid: sighting.key.uuid,
            major: sighting.key.major,
            minor: sighting.key.minor,
            rssi: sighting.rssi,
            distance: sighting.distance_m,
            proximity: Some(sighting.proximity),
            accuracy: UNKNOWN_ACCURACY,
            seen_at: sighting.seen_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn key() -> BeaconKey {
        BeaconKey {
            uuid: Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap(),
            major: 100,
            minor: 7,
        }
    }

    #[test]
    fn test_proximity_is_derived_at_construction() {
        assert_eq!(RangeSighting::new(key(), -60, 0.0, 0).proximity(), Proximity::Unknown);
        assert_eq!(RangeSighting::new(key(), -60, 3.0, 0).proximity(), Proximity::Immediate);
        assert_eq!(RangeSighting::new(key(), -60, 7.0, 0).proximity(), Proximity::Near);
        assert_eq!(RangeSighting::new(key(), -60, 12.0, 0).proximity(), Proximity::Far);
    }

    #[test]
    fn test_non_finite_distance_is_unknown() {
        let sighting = RangeSighting::new(key(), -60, f64::INFINITY, 0);
        assert_eq!(sighting.proximity(), Proximity::Unknown);
        assert!(sighting.distance_m() < 0.0);
        // must remain encodable
        assert!(serde_json::to_string(&sighting).is_ok());
    }

    #[test]
    fn test_storage_view_fields() {
        let sighting = RangeSighting::new(key(), -71, 7.5, 1_736_911_800_125);
        let value = serde_json::to_value(&sighting).unwrap();

        assert_eq!(
            value,
            json!({
                "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
                "major": "100",
                "minor": "7",
                "rssi": -71,
                "distance": 7.5,
                "proximity": "near",
                "accuracy": -1,
                "seenAt": 1_736_911_800_125_i64
            })
        );
    }

    #[test]
    fn test_storage_view_decodes_numeric_identifiers() {
        let sighting: RangeSighting = serde_json::from_value(json!({
            "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
            "major": 100,
            "minor": "7",
            "rssi": -50,
            "distance": 2.0,
            "proximity": "far",
            "seenAt": 42
        }))
        .unwrap();

        assert_eq!(sighting.key(), key());
        // stored proximity is ignored in favour of the derived one
        assert_eq!(sighting.proximity(), Proximity::Immediate);
        assert_eq!(sighting.seen_at_ms(), 42);
    }

    #[test]
    fn test_wire_view_fields() {
        let sighting = RangeSighting::new(key(), -71, 12.0, 1_736_911_800_125);
        let value = serde_json::to_value(sighting.to_wire(chrono_tz::UTC)).unwrap();

        let Value::Object(map) = value else {
            panic!("wire view must be an object");
        };
        let mut fields: Vec<_> = map.keys().map(String::as_str).collect();
        fields.sort_unstable();
        assert_eq!(
            fields,
            ["accuracy", "distance", "major", "minor", "proximity", "rssi", "seen_at", "uuid"]
        );
        assert_eq!(map["seen_at"], "2025-01-15 03:30:00.125");
        assert_eq!(map["proximity"], "far");
        assert_eq!(map["accuracy"], -1);
        assert_eq!(map["major"], "100");
    }

    #[test]
    fn test_seen_at_respects_timezone() {
        let sighting = RangeSighting::new(key(), -71, 1.0, 1_736_911_800_000);
        assert_eq!(
            sighting.seen_at_formatted(chrono_tz::America::New_York),
            "2025-01-14 22:30:00.000"
        );
    }

    #[test]
    fn test_from_raw_sighting() {
        let raw = RawSighting {
            uuid: key().uuid,
            major: 100,
            minor: 7,
            rssi: -80,
            distance_m: 9.99,
            seen_at_ms: 5,
        };
        let sighting = RangeSighting::from(raw);
        assert_eq!(sighting.key(), key());
        assert_eq!(sighting.rssi(), -80);
        assert_eq!(sighting.proximity(), Proximity::Near);
        assert_eq!(sighting.seen_at_ms(), 5);
    }

    #[test]
    fn test_raw_sighting_without_timestamp_is_stamped() {
        let before = chrono::Utc::now().timestamp_millis();
        let raw: RawSighting = serde_json::from_value(json!({
            "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
            "major": "100",
            "minor": 7,
            "rssi": -60,
            "distance": 1.0
        }))
        .unwrap();

        assert_eq!(raw.key(), key());
        assert!(raw.seen_at_ms >= before);
    }
}
