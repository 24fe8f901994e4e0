//! Shared types.
//!
//! Small value types used across the pipeline. The larger data model types
//! live in their own modules ([`crate::region`], [`crate::sighting`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend-assigned region identifier.
pub type RegionId = i64;

/// Proximity category derived from an estimated distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proximity {
    /// No usable distance estimate.
    Unknown,
    /// Closer than 5 meters.
    Immediate,
    /// Between 5 (inclusive) and 10 meters.
    Near,
    /// 10 meters or more.
    Far,
}

impl Proximity {
    /// Classify a distance in meters.
    ///
    /// ```
    /// use checkin_core::Proximity;
    ///
    /// assert_eq!(Proximity::from_distance(0.0), Proximity::Unknown);
    /// assert_eq!(Proximity::from_distance(3.0), Proximity::Immediate);
    /// assert_eq!(Proximity::from_distance(7.0), Proximity::Near);
    /// assert_eq!(Proximity::from_distance(12.0), Proximity::Far);
    /// ```
    #[must_use]
    pub fn from_distance(distance_m: f64) -> Self {
        if distance_m.is_nan() || distance_m <= 0.0 {
            Self::Unknown
        } else if distance_m < 5.0 {
            Self::Immediate
        } else if distance_m < 10.0 {
            Self::Near
        } else {
            Self::Far
        }
    }

    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Immediate => "immediate",
            Self::Near => "near",
            Self::Far => "far",
        }
    }
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a single physical beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BeaconKey {
    /// Proximity namespace UUID.
    pub uuid: Uuid,
    /// Major identifier.
    pub major: u16,
    /// Minor identifier.
    pub minor: u16,
}

impl fmt::Display for BeaconKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, MAJOR: {}, MINOR: {}", self.uuid, self.major, self.minor)
    }
}

/// Binary region presence reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// The device is inside the region.
    Inside,
    /// The device is outside the region.
    Outside,
}

/// Region transition reported to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionAction {
    /// Region entered.
    Enter,
    /// Region exited.
    Exit,
}

impl RegionAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

impl From<Presence> for RegionAction {
    fn from(presence: Presence) -> Self {
        match presence {
            Presence::Inside => Self::Enter,
            Presence::Outside => Self::Exit,
        }
    }
}

impl fmt::Display for RegionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitoring state of a single region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitoringState {
    /// Not registered with the scanner.
    #[default]
    Unmonitored,
    /// Registered with the scanner. `None` until the first signal arrives.
    Monitoring(Option<Presence>),
}

impl MonitoringState {
    /// Whether the last signal for this region was `Inside`.
    #[must_use]
    pub const fn is_inside(self) -> bool {
        matches!(self, Self::Monitoring(Some(Presence::Inside)))
    }
}

/// Serde helpers for beacon identifiers that travel as decimal strings but
/// may arrive as numbers.
pub(crate) mod id_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    pub(crate) enum RawId {
        Number(u64),
        Text(String),
    }

    impl RawId {
        /// Parse into an identifier. Empty text yields `None`.
        pub(crate) fn parse(self) -> Result<Option<u16>, String> {
            match self {
                Self::Number(n) => u16::try_from(n)
                    .map(Some)
                    .map_err(|_| format!("identifier {n} out of range")),
                Self::Text(s) if s.trim().is_empty() => Ok(None),
                Self::Text(s) => s
                    .trim()
                    .parse::<u16>()
                    .map(Some)
                    .map_err(|e| format!("invalid identifier '{s}': {e}")),
            }
        }
    }

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub(crate) fn serialize<S>(id: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(id)
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)?
            .ok_or_else(|| de::Error::custom("identifier is empty"))
    }
}
