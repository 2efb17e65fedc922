//! Normalisation of producer records into [`Event`]s.
//!
//! Producers in the wild do not emit the canonical event shape. This module
//! recognises the record shapes the engine is commonly fed and maps each to
//! a validated event:
//!
//! | Record | Recognised by | Becomes |
//! |---|---|---|
//! | canonical | `entity_key` + `kind` | as is |
//! | CDC change | `op` + `table` + `after` | `TRIP_UPDATE` / `RATING_UPDATE` |
//! | playback telemetry | `event_type` = `session_start` etc. | session events keyed by `user_id` |
//! | dispatch | `event_type` = `driver_update` / `order_ready` | `DRIVER_PING` / `ORDER_READY` |
//! | reaction | `post_id` | `INTERACTION` keyed by post |
//! | firehose post | `user` + `text` | `MESSAGE` keyed by author |
//!
//! Records that are recognised but carry nothing the engine acts on (a CDC
//! insert of a profile without a rating, a delete) normalise to `None`.

use serde_json::{Map, Value as Json};

use crate::entity::{EntityKey, Location};
use crate::error::ValidationError;
use crate::event::{payload, Event, EventKind};
use crate::time::Timestamp;
use crate::value::Value;

/// Shape a record was recognised as.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFormat {
    Canonical,
    Cdc,
    Playback,
    Dispatch,
    Reaction,
    Firehose,
}

/// CDC tables the engine consumes.
pub mod tables {
    pub const TRIPS_LEDGER: &str = "trips_ledger";
    pub const DRIVER_PROFILES: &str = "driver_profiles";
}

/// Works out which shape `record` has.
#[must_use]
pub fn detect(record: &Map<String, Json>) -> Option<RecordFormat> {
    if record.contains_key("entity_key") && record.contains_key("kind") {
        return Some(RecordFormat::Canonical);
    }
    if record.contains_key("op") && record.contains_key("table") {
        return Some(RecordFormat::Cdc);
    }
    match record.get("event_type").and_then(Json::as_str) {
        Some("session_start" | "playback_heartbeat" | "buffering_start" | "session_end") => {
            return Some(RecordFormat::Playback);
        }
        Some("driver_update" | "order_ready") => return Some(RecordFormat::Dispatch),
        Some("interaction") => return Some(RecordFormat::Reaction),
        _ => {}
    }
    if record.contains_key("post_id") {
        return Some(RecordFormat::Reaction);
    }
    if record.contains_key("user") && record.contains_key("text") {
        return Some(RecordFormat::Firehose);
    }
    None
}

/// Parses one JSON line and normalises it.
///
/// # Errors
///
/// `Decode` for invalid JSON or an unrecognised shape, otherwise whatever
/// the normalised event fails validation with.
pub fn normalize_str(line: &str, fallback_time: Timestamp) -> Result<Option<Event>, ValidationError> {
    let json: Json = serde_json::from_str(line).map_err(|e| ValidationError::Decode {
        message: e.to_string(),
    })?;
    normalize(&json, fallback_time)
}

/// Normalises a decoded record. `fallback_time` is used when the record
/// carries no timestamp of its own.
///
/// # Errors
///
/// `Decode` for non-object input or an unrecognised shape, otherwise
/// whatever the normalised event fails validation with.
pub fn normalize(record: &Json, fallback_time: Timestamp) -> Result<Option<Event>, ValidationError> {
    let Some(obj) = record.as_object() else {
        return Err(decode("record is not a JSON object"));
    };
    let Some(format) = detect(obj) else {
        return Err(decode("unrecognised record shape"));
    };

    let event = match format {
        RecordFormat::Canonical => Some(serde_json::from_value::<Event>(record.clone()).map_err(|e| {
            ValidationError::Decode {
                message: e.to_string(),
            }
        })?),
        RecordFormat::Cdc => cdc(obj, fallback_time)?,
        RecordFormat::Playback => Some(playback(obj, fallback_time)?),
        RecordFormat::Dispatch => Some(dispatch(obj, fallback_time)?),
        RecordFormat::Reaction => Some(reaction(obj, fallback_time)?),
        RecordFormat::Firehose => Some(firehose(obj, fallback_time)?),
    };

    match event {
        Some(event) => {
            event.validate()?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

fn cdc(obj: &Map<String, Json>, fallback: Timestamp) -> Result<Option<Event>, ValidationError> {
    if obj.get("op").and_then(Json::as_str) == Some("d") {
        return Ok(None);
    }
    let Some(after) = obj.get("after").and_then(Json::as_object) else {
        return Ok(None);
    };
    let at = millis(obj, "ts_ms").unwrap_or(fallback);

    match obj.get("table").and_then(Json::as_str) {
        Some(tables::TRIPS_LEDGER) => {
            let kind = EventKind::TripUpdate;
            let key = key_field(after, "driver_id", kind)?;
            let trips = scalar(after, "trips_today").ok_or_else(|| missing(kind, "trips_today"))?;
            Ok(Some(Event::new(key, kind, at).with(payload::TRIPS, trips)))
        }
        Some(tables::DRIVER_PROFILES) => {
            let Some(rating) = scalar(after, "rating") else {
                return Ok(None);
            };
            let kind = EventKind::RatingUpdate;
            let key = key_field(after, "driver_id", kind)?;
            Ok(Some(Event::new(key, kind, at).with(payload::RATING, rating)))
        }
        _ => Ok(None),
    }
}

fn playback(obj: &Map<String, Json>, fallback: Timestamp) -> Result<Event, ValidationError> {
    let kind = match obj.get("event_type").and_then(Json::as_str) {
        Some("session_start") => EventKind::SessionStart,
        Some("buffering_start") => EventKind::Buffer,
        Some("session_end") => EventKind::SessionEnd,
        _ => EventKind::Heartbeat,
    };
    let key = key_field(obj, "user_id", kind)?;
    let at = millis(obj, "timestamp_ms").unwrap_or(fallback);
    let mut event = Event::new(key, kind, at);
    if let Some(title) = obj.get("title").and_then(Json::as_str) {
        event = event.with(payload::TITLE, title);
    }
    Ok(event)
}

fn dispatch(obj: &Map<String, Json>, fallback: Timestamp) -> Result<Event, ValidationError> {
    let (kind, id_field) = match obj.get("event_type").and_then(Json::as_str) {
        Some("order_ready") => (EventKind::OrderReady, "order_id"),
        _ => (EventKind::DriverPing, "driver_id"),
    };
    let key = key_field(obj, id_field, kind)?;
    let at = seconds(obj, "timestamp").unwrap_or(fallback);
    let location = location(obj, kind)?;

    let mut event = Event::new(key, kind, at).at(location);
    if let Some(status) = obj.get("status").and_then(Json::as_str) {
        event = event.with(payload::STATUS, status);
    }
    if let Some(restaurant) = obj.get("restaurant").and_then(Json::as_str) {
        event = event.with("restaurant", restaurant);
    }
    Ok(event)
}

fn reaction(obj: &Map<String, Json>, fallback: Timestamp) -> Result<Event, ValidationError> {
    let kind = EventKind::Interaction;
    let key = key_field(obj, "post_id", kind)?;
    let at = millis(obj, "timestamp_ms").unwrap_or(fallback);
    let mut event = Event::new(key, kind, at);
    if let Some(reaction) = obj.get("reaction").and_then(Json::as_str) {
        event = event.with("reaction", reaction);
    }
    Ok(event)
}

fn firehose(obj: &Map<String, Json>, fallback: Timestamp) -> Result<Event, ValidationError> {
    let kind = EventKind::Message;
    let key = key_field(obj, "user", kind)?;
    let at = millis(obj, "timestamp_ms").unwrap_or(fallback);
    let text = obj
        .get("text")
        .and_then(Json::as_str)
        .ok_or_else(|| missing(kind, payload::TEXT))?;
    let mut event = Event::new(key, kind, at).with(payload::TEXT, text);
    if let Some(topic) = obj.get("topic").and_then(Json::as_str) {
        event = event.with(payload::TOPIC, topic);
    }
    Ok(event)
}

/// Accepts `[lat, lon]` or `{"lat": .., "lon": ..}`.
fn location(obj: &Map<String, Json>, kind: EventKind) -> Result<Location, ValidationError> {
    let raw = obj.get("location").ok_or_else(|| missing(kind, "location"))?;
    let pair = match raw {
        Json::Array(items) if items.len() == 2 => items[0].as_f64().zip(items[1].as_f64()),
        Json::Object(m) => m
            .get("lat")
            .and_then(Json::as_f64)
            .zip(m.get("lon").and_then(Json::as_f64)),
        _ => None,
    };
    pair.map(|(lat, lon)| Location::new(lat, lon))
        .ok_or_else(|| ValidationError::InvalidField {
            kind,
            field: "location".to_string(),
            reason: format!("expected [lat, lon] or {{lat, lon}}, got {raw}"),
        })
}

/// Ids arrive as strings or numbers; both become keys.
fn key_field(obj: &Map<String, Json>, field: &str, kind: EventKind) -> Result<EntityKey, ValidationError> {
    match obj.get(field) {
        Some(Json::String(s)) => Ok(EntityKey::new(s.as_str())),
        Some(Json::Number(n)) => Ok(EntityKey::new(n.to_string())),
        Some(other) => Err(ValidationError::InvalidField {
            kind,
            field: field.to_string(),
            reason: format!("expected string or number id, got {other}"),
        }),
        None => Err(missing(kind, field)),
    }
}

fn scalar(obj: &Map<String, Json>, field: &str) -> Option<Value> {
    obj.get(field).and_then(Value::from_json).filter(|v| !v.is_null())
}

fn millis(obj: &Map<String, Json>, field: &str) -> Option<Timestamp> {
    obj.get(field).and_then(Json::as_i64).map(Timestamp::from_millis)
}

/// Epoch seconds (possibly fractional).
fn seconds(obj: &Map<String, Json>, field: &str) -> Option<Timestamp> {
    let secs = obj.get(field).and_then(Json::as_f64)?;
    #[allow(clippy::cast_possible_truncation)]
    let ms = (secs * 1000.0).round() as i64;
    Some(Timestamp::from_millis(ms))
}

fn missing(kind: EventKind, field: &str) -> ValidationError {
    ValidationError::MissingField {
        kind,
        field: field.to_string(),
    }
}

fn decode(message: &str) -> ValidationError {
    ValidationError::Decode {
        message: message.to_string(),
    }
}
