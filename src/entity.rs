//! Entity identity and per-entity state.
//!
//! Every event names the entity it is about (a driver, a playback session, a
//! post, a user). The entity key is the unit of partitioning: all state for a
//! key lives in one shard and is mutated by one writer at a time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;
use crate::value::Value;

/// Identity under which state is partitioned.
///
/// # Examples
///
/// ```
/// use kyrostream::EntityKey;
///
/// let key = EntityKey::from("driver-101");
/// assert_eq!(key.as_str(), "driver-101");
/// assert!(key.shard(8) < 8);
/// assert_eq!(key.shard(8), EntityKey::from("driver-101").shard(8));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Stable shard index in `0..shards`.
    ///
    /// Hashed with blake3, so routing is identical across processes.
    #[must_use]
    pub fn shard(&self, shards: usize) -> usize {
        let shards = shards.max(1);
        let hash = blake3::hash(self.0.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        let h = u64::from_le_bytes(prefix);
        let modulus = u64::try_from(shards).unwrap_or(u64::MAX);
        usize::try_from(h % modulus).unwrap_or(shards - 1)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    /// Known key with no lifecycle started yet.
    #[default]
    None,
    Active,
    Idle,
    Busy,
    /// Terminal.
    Ended,
}

impl EntityStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Active => "ACTIVE",
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Ended => "ENDED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Parses a status label as producers send it (`"IDLE"`, `"busy"`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(Self::None),
            "ACTIVE" => Some(Self::Active),
            "IDLE" => Some(Self::Idle),
            "BUSY" => Some(Self::Busy),
            "ENDED" => Some(Self::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity an event refers to. Decides defaults and lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    /// Playback session (start / heartbeat / buffer / end).
    Session,
    /// Long-lived resource: location, availability, incentive counters.
    Driver,
    /// Demand event such as an order. Transient; never stored.
    Demand,
    /// Content item whose interaction velocity is tracked.
    Post,
    /// Author of free-text messages.
    User,
}

impl EntityClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Driver => "driver",
            Self::Demand => "demand",
            Self::Post => "post",
            Self::User => "user",
        }
    }

    /// Status assigned when an entity of this class is first created.
    #[must_use]
    pub const fn initial_status(self) -> EntityStatus {
        match self {
            Self::Session | Self::Driver | Self::Demand => EntityStatus::None,
            Self::Post | Self::User => EntityStatus::Active,
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to an entity's state once it reaches a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePolicy {
    /// Discard the state in the same mutation that ends it.
    #[default]
    RemoveOnEnd,
    /// Keep the ENDED record resident.
    Retain,
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lon)
    }
}

/// Well-known counter, gauge and flag names.
pub mod fields {
    /// Buffering events in the current session.
    pub const BUFFER_COUNT: &str = "buffer_count";
    /// Heartbeats in the current session.
    pub const HEARTBEATS: &str = "heartbeats";
    /// Sticky: QoE alert already emitted for this session.
    pub const QOE_ALERTED: &str = "qoe_alerted";
    /// Trips completed today.
    pub const TRIPS: &str = "trips";
    /// Driver rating.
    pub const RATING: &str = "rating";
    /// Sticky: bonus granted. Never cleared.
    pub const BONUS_UNLOCKED: &str = "bonus_unlocked";
    /// Lifetime interactions on a post.
    pub const INTERACTIONS: &str = "interactions";
    /// Admitted messages by a user.
    pub const MESSAGES: &str = "messages";
    /// Completed assignments for a driver.
    pub const ASSIGNMENTS: &str = "assignments";
    /// Session title attribute.
    pub const TITLE: &str = "title";

    /// Rating a driver starts with before any rating update arrives.
    pub const DEFAULT_RATING: f64 = 5.0;
}

/// Mutable per-entity record, exclusively owned by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub key: EntityKey,
    pub class: EntityClass,
    pub status: EntityStatus,
    pub counters: BTreeMap<String, i64>,
    pub gauges: BTreeMap<String, f64>,
    pub sticky_flags: BTreeMap<String, bool>,
    pub location: Option<Location>,
    pub attributes: BTreeMap<String, Value>,
    pub started_at: Option<Timestamp>,
    pub last_update: Timestamp,
}

impl EntityState {
    /// Creates a record with class-specific defaults.
    #[must_use]
    pub fn new(key: EntityKey, class: EntityClass, at: Timestamp) -> Self {
        let mut state = Self {
            key,
            class,
            status: class.initial_status(),
            counters: BTreeMap::new(),
            gauges: BTreeMap::new(),
            sticky_flags: BTreeMap::new(),
            location: None,
            attributes: BTreeMap::new(),
            started_at: None,
            last_update: at,
        };
        if class == EntityClass::Driver {
            state.counters.insert(fields::TRIPS.to_string(), 0);
            state.gauges.insert(fields::RATING.to_string(), fields::DEFAULT_RATING);
        }
        state
    }

    /// Counter value, 0 when absent.
    #[must_use]
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }

    /// Sticky flag value, false when absent.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.sticky_flags.get(name).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.status, EntityStatus::Idle)
    }
}
