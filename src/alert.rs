//! Alerts emitted by the rule evaluator.
//!
//! Alerts are values, not state: once emitted they are handed to the output
//! sink and never stored by the engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityKey;
use crate::time::Timestamp;
use crate::value::Value;

/// Alert attribute names.
pub mod attrs {
    pub const MATCHED_ENTITY: &str = "matched_entity";
    pub const DEMAND_LOCATION: &str = "demand_location";
    pub const BUFFER_COUNT: &str = "buffer_count";
    pub const TITLE: &str = "title";
    pub const TRIPS: &str = "trips";
    pub const RATING: &str = "rating";
    pub const TOPIC: &str = "topic";
    pub const TEXT: &str = "text";
    pub const RISING_THRESHOLD: &str = "rising_threshold";
    pub const HIGH_THRESHOLD: &str = "high_threshold";
}

/// Alert kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    /// Session crossed the buffering limit.
    QoeCritical,
    /// Driver met the daily incentive target.
    BonusUnlocked,
    /// Post velocity above the high threshold.
    ViralTrend,
    /// Post velocity above the rising threshold.
    Rising,
    /// Demand assigned to an idle resource.
    MatchSuccess,
    /// No idle resource was available.
    MatchFailed,
    /// Event admitted by the filter.
    FilterPass,
    /// Session ended; metric value is its duration in seconds.
    SessionSummary,
}

impl AlertKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QoeCritical => "QOE_CRITICAL",
            Self::BonusUnlocked => "BONUS_UNLOCKED",
            Self::ViralTrend => "VIRAL_TREND",
            Self::Rising => "RISING",
            Self::MatchSuccess => "MATCH_SUCCESS",
            Self::MatchFailed => "MATCH_FAILED",
            Self::FilterPass => "FILTER_PASS",
            Self::SessionSummary => "SESSION_SUMMARY",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emitted alert.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub kind: AlertKind,
    pub key: EntityKey,
    pub metric_value: f64,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

impl Alert {
    #[must_use]
    pub fn new(kind: AlertKind, key: EntityKey, metric_value: f64, timestamp: Timestamp) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            kind,
            key,
            metric_value,
            timestamp,
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key={} value={}", self.kind, self.key, self.metric_value)
    }
}
