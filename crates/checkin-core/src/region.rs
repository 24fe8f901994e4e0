//! Monitored beacon regions as delivered by the backend catalog.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::id_string::RawId;
use crate::types::RegionId;

/// Prefix of the scanner-level token assigned to each region.
pub const REGION_TOKEN_PREFIX: &str = "checkin-region-";

/// Errors raised while decoding a region payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    /// The namespace UUID could not be parsed.
    #[error("Invalid region UUID '{value}': {reason}")]
    InvalidUuid {
        /// The rejected value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A major or minor identifier could not be parsed.
    #[error("Invalid {field} identifier: {reason}")]
    InvalidIdentifier {
        /// `major` or `minor`.
        field: &'static str,
        /// Parser message.
        reason: String,
    },
}

/// A monitored beacon area: `(uuid, major?, minor?)` plus backend metadata.
///
/// Immutable after fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RegionPayload")]
pub struct Region {
    id: RegionId,
    name: Option<String>,
    uuid: Uuid,
    major: Option<u16>,
    minor: Option<u16>,
    active: bool,
}

impl Region {
    /// Create a region.
    ///
    /// A `minor` without a `major` is dropped, scanner regions cannot
    /// express it.
    #[must_use]
    pub fn new(id: RegionId, uuid: Uuid, major: Option<u16>, minor: Option<u16>) -> Self {
        Self {
            id,
            name: None,
            uuid,
            major,
            minor: major.and(minor),
            active: true,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the active flag.
    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Backend id.
    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    /// Display name, if the backend provided one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Namespace UUID.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Major identifier, `None` matches every major.
    #[must_use]
    pub const fn major(&self) -> Option<u16> {
        self.major
    }

    /// Minor identifier, `None` matches every minor.
    #[must_use]
    pub const fn minor(&self) -> Option<u16> {
        self.minor
    }

    /// Whether the backend marks this region as active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Scanner-level token identifying this region.
    #[must_use]
    pub fn token(&self) -> String {
        format!("{REGION_TOKEN_PREFIX}{}", self.id)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region {}:{}", self.id, self.uuid)?;
        if let Some(major) = self.major {
            write!(f, ", MAJOR: {major}")?;
        }
        if let Some(minor) = self.minor {
            write!(f, ", MINOR: {minor}")?;
        }
        Ok(())
    }
}

/// Backend shape of a region, lenient about identifier encoding.
#[derive(Debug, Deserialize)]
struct RegionPayload {
    id: RegionId,
    #[serde(default)]
    name: Option<String>,
    uuid: String,
    #[serde(default)]
    major: Option<RawId>,
    #[serde(default)]
    minor: Option<RawId>,
    #[serde(default)]
    active: Option<bool>,
}

fn parse_identifier(field: &'static str, raw: Option<RawId>) -> Result<Option<u16>, RegionError> {
    raw.map_or(Ok(None), |raw| {
        raw.parse()
            .map_err(|reason| RegionError::InvalidIdentifier { field, reason })
    })
}

impl TryFrom<RegionPayload> for Region {
    type Error = RegionError;

    fn try_from(payload: RegionPayload) -> Result<Self, Self::Error> {
        let uuid = Uuid::parse_str(payload.uuid.trim()).map_err(|e| RegionError::InvalidUuid {
            value: payload.uuid.clone(),
            reason: e.to_string(),
        })?;
        let major = parse_identifier("major", payload.major)?;
        let minor = parse_identifier("minor", payload.minor)?;

        let mut region = Self::new(payload.id, uuid, major, minor)
            .with_active(payload.active.unwrap_or(true));
        region.name = payload.name.filter(|n| !n.is_empty());
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UUID: &str = "f7826da6-4fa2-4e98-8024-bc5b71e0893e";

    #[test]
    fn test_region_from_backend_payload() {
        let region: Region = serde_json::from_value(json!({
            "id": 7,
            "name": "Gate A",
            "uuid": UUID,
            "major": "100",
            "minor": "",
            "active": true
        }))
        .unwrap();

        assert_eq!(region.id(), 7);
        assert_eq!(region.name(), Some("Gate A"));
        assert_eq!(region.uuid().to_string(), UUID);
        assert_eq!(region.major(), Some(100));
        assert_eq!(region.minor(), None);
        assert!(region.is_active());
        assert_eq!(region.token(), "checkin-region-7");
    }

    #[test]
    fn test_region_wildcard_identifiers() {
        let region: Region = serde_json::from_value(json!({
            "id": 1,
            "uuid": UUID,
            "major": null,
            "minor": 5
        }))
        .unwrap();

        assert_eq!(region.major(), None);
        // minor is meaningless without major
        assert_eq!(region.minor(), None);
        assert!(region.is_active());
    }

    #[test]
    fn test_region_numeric_identifiers_and_inactive() {
        let region: Region = serde_json::from_value(json!({
            "id": 2,
            "uuid": UUID,
            "major": 1,
            "minor": 2,
            "active": false
        }))
        .unwrap();

        assert_eq!(region.major(), Some(1));
        assert_eq!(region.minor(), Some(2));
        assert!(!region.is_active());
    }

    #[test]
    fn test_region_rejects_bad_uuid() {
        let result: Result<Region, _> = serde_json::from_value(json!({
            "id": 3,
            "uuid": "not-a-uuid"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_region_rejects_bad_major() {
        let result: Result<Region, _> = serde_json::from_value(json!({
            "id": 4,
            "uuid": UUID,
            "major": "lobby"
        }));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("major"));
    }

    #[test]
    fn test_payload_debug_shows_raw_identifiers() {
        let payload: RegionPayload = serde_json::from_value(json!({
            "id": 5,
            "uuid": UUID,
            "major": "12",
            "minor": 3
        }))
        .unwrap();

        let debug = format!("{payload:?}");
        assert!(debug.contains(r#"Text("12")"#));
        assert!(debug.contains("Number(3)"));
    }

    #[test]
    fn test_region_display() {
        let uuid = Uuid::parse_str(UUID).unwrap();
        assert_eq!(
            Region::new(9, uuid, None, None).to_string(),
            format!("Region 9:{UUID}")
        );
        assert_eq!(
            Region::new(9, uuid, Some(3), Some(4)).to_string(),
            format!("Region 9:{UUID}, MAJOR: 3, MINOR: 4")
        );
    }
}
