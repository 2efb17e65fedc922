//! Events: the immutable unit of ingestion.
//!
//! An event names an entity, a kind from a closed set, a scalar payload, and
//! the time it was ingested. `Event::validate` enforces the per-kind payload
//! shape; anything that fails is a malformed event and is dropped by the
//! engine before it can touch state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityClass, EntityKey, EntityStatus, Location};
use crate::error::ValidationError;
use crate::time::Timestamp;
use crate::value::Value;

/// Payload field names read by the engine.
pub mod payload {
    pub const TITLE: &str = "title";
    pub const TRIPS: &str = "trips";
    pub const RATING: &str = "rating";
    pub const LAT: &str = "lat";
    pub const LON: &str = "lon";
    pub const STATUS: &str = "status";
    pub const TEXT: &str = "text";
    pub const TOPIC: &str = "topic";
}

/// Closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SessionStart,
    Heartbeat,
    Buffer,
    SessionEnd,
    TripUpdate,
    RatingUpdate,
    DriverPing,
    OrderReady,
    Interaction,
    /// Free-text post authored by the keyed user.
    Message,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::SessionStart,
        Self::Heartbeat,
        Self::Buffer,
        Self::SessionEnd,
        Self::TripUpdate,
        Self::RatingUpdate,
        Self::DriverPing,
        Self::OrderReady,
        Self::Interaction,
        Self::Message,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SESSION_START",
            Self::Heartbeat => "HEARTBEAT",
            Self::Buffer => "BUFFER",
            Self::SessionEnd => "SESSION_END",
            Self::TripUpdate => "TRIP_UPDATE",
            Self::RatingUpdate => "RATING_UPDATE",
            Self::DriverPing => "DRIVER_PING",
            Self::OrderReady => "ORDER_READY",
            Self::Interaction => "INTERACTION",
            Self::Message => "MESSAGE",
        }
    }

    /// Entity class the event's key belongs to.
    #[must_use]
    pub const fn entity_class(self) -> EntityClass {
        match self {
            Self::SessionStart | Self::Heartbeat | Self::Buffer | Self::SessionEnd => {
                EntityClass::Session
            }
            Self::TripUpdate | Self::RatingUpdate | Self::DriverPing => EntityClass::Driver,
            Self::OrderReady => EntityClass::Demand,
            Self::Interaction => EntityClass::Post,
            Self::Message => EntityClass::User,
        }
    }

    /// Payload fields that must be present.
    #[must_use]
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::SessionStart
            | Self::Heartbeat
            | Self::Buffer
            | Self::SessionEnd
            | Self::Interaction => &[],
            Self::TripUpdate => &[payload::TRIPS],
            Self::RatingUpdate => &[payload::RATING],
            Self::DriverPing | Self::OrderReady => &[payload::LAT, payload::LON],
            Self::Message => &[payload::TEXT],
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == upper)
            .ok_or_else(|| ValidationError::UnknownEventKind { name: s.to_string() })
    }
}

/// An ingested event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub entity_key: EntityKey,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    pub ingest_time: Timestamp,
}

impl Event {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(entity_key: impl Into<EntityKey>, kind: EventKind, ingest_time: Timestamp) -> Self {
        Self {
            entity_key: entity_key.into(),
            kind,
            payload: BTreeMap::new(),
            ingest_time,
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(field.into(), value.into());
        self
    }

    /// Adds `lat`/`lon` payload fields.
    #[must_use]
    pub fn at(self, location: Location) -> Self {
        self.with(payload::LAT, location.lat).with(payload::LON, location.lon)
    }

    /// Decodes the canonical JSON shape and validates it.
    ///
    /// # Errors
    ///
    /// `ValidationError::Decode` for syntax/shape errors, otherwise whatever
    /// [`Event::validate`] reports.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let event: Self = serde_json::from_str(json).map_err(|e| ValidationError::Decode {
            message: e.to_string(),
        })?;
        event.validate()?;
        Ok(event)
    }

    #[must_use]
    pub const fn entity_class(&self) -> EntityClass {
        self.kind.entity_class()
    }

    /// Checks the entity key and the per-kind payload contract.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity_key.is_empty() {
            return Err(ValidationError::EmptyEntityKey);
        }

        for field in self.kind.required_fields() {
            if self.payload.get(*field).map_or(true, Value::is_null) {
                return Err(ValidationError::MissingField {
                    kind: self.kind,
                    field: (*field).to_string(),
                });
            }
        }

        match self.kind {
            EventKind::TripUpdate => {
                let trips = self.int_field(payload::TRIPS)?;
                if trips < 0 {
                    return Err(self.invalid(payload::TRIPS, format!("must be >= 0, got {trips}")));
                }
            }
            EventKind::RatingUpdate => {
                self.float_field(payload::RATING)?;
            }
            EventKind::DriverPing | EventKind::OrderReady => {
                self.location()?;
                if self.kind == EventKind::DriverPing {
                    self.reported_status()?;
                }
            }
            EventKind::Message => {
                self.str_field(payload::TEXT)?;
                if self.payload.contains_key(payload::TOPIC) {
                    self.str_field(payload::TOPIC)?;
                }
            }
            EventKind::SessionStart
            | EventKind::Heartbeat
            | EventKind::Buffer
            | EventKind::SessionEnd
            | EventKind::Interaction => {}
        }

        Ok(())
    }

    /// Raw payload access.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Integer payload field.
    ///
    /// # Errors
    ///
    /// Missing or non-integer field.
    pub fn int_field(&self, name: &str) -> Result<i64, ValidationError> {
        let v = self.required(name)?;
        v.as_int()
            .ok_or_else(|| self.invalid(name, format!("expected int, got {}", v.type_name())))
    }

    /// Numeric payload field (ints widen).
    ///
    /// # Errors
    ///
    /// Missing, non-numeric or non-finite field.
    pub fn float_field(&self, name: &str) -> Result<f64, ValidationError> {
        let v = self.required(name)?;
        match v.as_float() {
            Some(f) if f.is_finite() => Ok(f),
            Some(f) => Err(self.invalid(name, format!("expected finite number, got {f}"))),
            None => Err(self.invalid(name, format!("expected number, got {}", v.type_name()))),
        }
    }

    /// String payload field.
    ///
    /// # Errors
    ///
    /// Missing or non-string field.
    pub fn str_field(&self, name: &str) -> Result<&str, ValidationError> {
        let v = self.required(name)?;
        v.as_str()
            .ok_or_else(|| self.invalid(name, format!("expected string, got {}", v.type_name())))
    }

    /// Optional string payload field; wrong types read as absent.
    #[must_use]
    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// `lat`/`lon` as a location.
    ///
    /// # Errors
    ///
    /// Missing, non-numeric, or out-of-range coordinates.
    pub fn location(&self) -> Result<Location, ValidationError> {
        let lat = self.float_field(payload::LAT)?;
        let lon = self.float_field(payload::LON)?;
        if !(-90.0..=90.0).contains(&lat) {
            return Err(self.invalid(payload::LAT, format!("latitude {lat} out of range")));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(self.invalid(payload::LON, format!("longitude {lon} out of range")));
        }
        Ok(Location::new(lat, lon))
    }

    /// Availability reported by a driver ping. Absent means IDLE.
    ///
    /// # Errors
    ///
    /// A status other than `IDLE` or `BUSY`.
    pub fn reported_status(&self) -> Result<EntityStatus, ValidationError> {
        let Some(raw) = self.payload.get(payload::STATUS) else {
            return Ok(EntityStatus::Idle);
        };
        match raw.as_str().and_then(EntityStatus::parse) {
            Some(s @ (EntityStatus::Idle | EntityStatus::Busy)) => Ok(s),
            _ => Err(self.invalid(payload::STATUS, format!("expected IDLE or BUSY, got {raw}"))),
        }
    }

    fn required(&self, name: &str) -> Result<&Value, ValidationError> {
        match self.payload.get(name) {
            Some(v) if !v.is_null() => Ok(v),
            _ => Err(ValidationError::MissingField {
                kind: self.kind,
                field: name.to_string(),
            }),
        }
    }

    fn invalid(&self, field: &str, reason: String) -> ValidationError {
        ValidationError::InvalidField {
            kind: self.kind,
            field: field.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!("driver_ping".parse::<EventKind>().unwrap(), EventKind::DriverPing);
        assert!(matches!(
            "teleport".parse::<EventKind>(),
            Err(ValidationError::UnknownEventKind { .. })
        ));
    }

    #[test]
    fn test_from_json_canonical_shape() {
        let json = r#"{
            "entity_key": "101",
            "kind": "DRIVER_PING",
            "payload": {"lat": 47.60, "lon": -122.33, "status": "IDLE"},
            "ingest_time": 1000
        }"#;
        let ev = Event::from_json(json).unwrap();
        assert_eq!(ev.kind, EventKind::DriverPing);
        assert_eq!(ev.location().unwrap(), Location::new(47.60, -122.33));
        assert_eq!(ev.ingest_time, Timestamp::from_millis(1000));
    }

    #[test]
    fn test_missing_required_field() {
        let ev = Event::new("99", EventKind::TripUpdate, Timestamp::EPOCH);
        assert_eq!(
            ev.validate(),
            Err(ValidationError::MissingField {
                kind: EventKind::TripUpdate,
                field: "trips".to_string()
            })
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        let ev = Event::new("  ", EventKind::Heartbeat, Timestamp::EPOCH);
        assert_eq!(ev.validate(), Err(ValidationError::EmptyEntityKey));
    }

    #[test]
    fn test_invalid_field_types() {
        let ev = Event::new("99", EventKind::TripUpdate, Timestamp::EPOCH).with("trips", "ten");
        assert!(matches!(ev.validate(), Err(ValidationError::InvalidField { .. })));

        let ev = Event::new("99", EventKind::TripUpdate, Timestamp::EPOCH).with("trips", -1);
        assert!(matches!(ev.validate(), Err(ValidationError::InvalidField { .. })));

        let ev = Event::new("101", EventKind::DriverPing, Timestamp::EPOCH)
            .at(Location::new(47.6, -122.3))
            .with("status", "ONBOARDING");
        assert!(matches!(ev.validate(), Err(ValidationError::InvalidField { .. })));

        let ev = Event::new("o1", EventKind::OrderReady, Timestamp::EPOCH)
            .with("lat", 123.0)
            .with("lon", 0.0);
        assert!(matches!(ev.validate(), Err(ValidationError::InvalidField { .. })));
    }

    #[test]
    fn test_reported_status_defaults_to_idle() {
        let ev = Event::new("101", EventKind::DriverPing, Timestamp::EPOCH).at(Location::new(1.0, 2.0));
        assert_eq!(ev.reported_status().unwrap(), EntityStatus::Idle);
        let ev = ev.with("status", "busy");
        assert_eq!(ev.reported_status().unwrap(), EntityStatus::Busy);
    }

    #[test]
    fn test_kind_classes() {
        assert_eq!(EventKind::Buffer.entity_class(), EntityClass::Session);
        assert_eq!(EventKind::RatingUpdate.entity_class(), EntityClass::Driver);
        assert_eq!(EventKind::OrderReady.entity_class(), EntityClass::Demand);
        assert_eq!(EventKind::Interaction.entity_class(), EntityClass::Post);
        assert_eq!(EventKind::Message.entity_class(), EntityClass::User);
    }
}
