//! Payload values carried by events and alerts.
//!
//! Values are deliberately small: the engine only needs scalars to read
//! counters, coordinates, ratings and free text out of event payloads.

use serde::{Deserialize, Serialize};

/// A scalar payload value.
///
/// Serialized untagged, so `{"lat": 47.6, "status": "IDLE"}` decodes directly.
///
/// # Examples
///
/// ```
/// use kyrostream::Value;
///
/// let trips = Value::Int(16);
/// let rating = Value::Float(4.9);
/// let title = Value::from("Stranger Things");
///
/// assert_eq!(trips.as_int(), Some(16));
/// assert_eq!(trips.as_float(), Some(16.0));
/// assert!(rating.is_float());
/// assert_eq!(title.as_str(), Some("Stranger Things"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    #[default]
    Null,
}

impl Value {
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view. Floats with no fractional part are accepted, since JSON
    /// producers frequently emit `16.0` for a count.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Null => "null",
        }
    }

    /// Converts a JSON scalar. Arrays and objects have no scalar form and
    /// return `None`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_decode() {
        let v: Value = serde_json::from_str("47.601").unwrap();
        assert_eq!(v, Value::Float(47.601));

        let v: Value = serde_json::from_str("16").unwrap();
        assert_eq!(v, Value::Int(16));

        let v: Value = serde_json::from_str("\"IDLE\"").unwrap();
        assert_eq!(v.as_str(), Some("IDLE"));

        let v: Value = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Float(16.0).as_int(), Some(16));
        assert_eq!(Value::Float(16.5).as_int(), None);
        assert_eq!(Value::Int(5).as_float(), Some(5.0));
        assert_eq!(Value::from("5").as_float(), None);
    }

    #[test]
    fn test_from_json_rejects_containers() {
        assert_eq!(Value::from_json(&serde_json::json!([1, 2])), None);
        assert_eq!(Value::from_json(&serde_json::json!({"a": 1})), None);
        assert_eq!(Value::from_json(&serde_json::json!(4.8)), Some(Value::Float(4.8)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::from("x").to_string(), "\"x\"");
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Bool(true).type_name(), "bool");
    }
}
