//! Engine configuration.
//!
//! Supplied once at construction and immutable afterwards. Every field has a
//! default, so a TOML file only needs the values it overrides:
//!
//! ```toml
//! qoe_buffer_limit = 3
//! bonus_trips_threshold = 15
//! bonus_rating_threshold = 4.8
//! viral_high_threshold = 15
//! viral_rising_threshold = 5
//! window_tick_interval_ms = 2000
//! blocklist = ["@user_1234", "@bot_999"]
//! keyword_set = ["#AI", "#Python", "Tech"]
//! always_admit_category = "Tech"
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::LifecyclePolicy;
use crate::error::ConfigError;
use crate::event::EventKind;
use crate::filter::Filter;
use crate::storage::TerminalPolicy;

/// What to do with an event for an entity whose lifecycle never started.
/// Either way the event is a no-op and emits no alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownEntityPolicy {
    /// Count it and log at debug level.
    #[default]
    Ignore,
    /// Count it and log a warning.
    Warn,
}

/// Engine configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Buffering events in one session before `QOE_CRITICAL` fires.
    pub qoe_buffer_limit: u32,
    /// Trips required for the bonus.
    pub bonus_trips_threshold: u32,
    /// Minimum rating for the bonus.
    pub bonus_rating_threshold: f64,
    /// Window count above which `VIRAL_TREND` fires.
    pub viral_high_threshold: u64,
    /// Window count above which `RISING` fires.
    pub viral_rising_threshold: u64,
    /// Tumbling window length.
    pub window_tick_interval_ms: u64,
    pub blocklist: BTreeSet<String>,
    pub keyword_set: BTreeSet<String>,
    pub always_admit_category: Option<String>,

    /// Turns the admission filter on.
    pub filter_enabled: bool,
    /// Kinds the filter applies to. Other kinds bypass it.
    pub filtered_kinds: BTreeSet<EventKind>,
    /// Emit `FILTER_PASS` for admitted events.
    pub emit_filter_pass: bool,
    pub terminal_policy: TerminalPolicy,
    pub unknown_entity_policy: UnknownEntityPolicy,
    pub session_lifecycle: LifecyclePolicy,

    /// Shard count for the state store, window aggregator and runtime workers.
    pub shards: usize,
    /// Per-shard inbound queue capacity.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            qoe_buffer_limit: 3,
            bonus_trips_threshold: 15,
            bonus_rating_threshold: 4.8,
            viral_high_threshold: 15,
            viral_rising_threshold: 5,
            window_tick_interval_ms: 2_000,
            blocklist: ["@user_1234", "@bot_999"].into_iter().map(String::from).collect(),
            keyword_set: ["#AI", "#Python", "Tech"].into_iter().map(String::from).collect(),
            always_admit_category: Some("Tech".to_string()),
            filter_enabled: true,
            filtered_kinds: BTreeSet::from([EventKind::Message]),
            emit_filter_pass: false,
            terminal_policy: TerminalPolicy::Ignore,
            unknown_entity_policy: UnknownEntityPolicy::Ignore,
            session_lifecycle: LifecyclePolicy::RemoveOnEnd,
            shards: 4,
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Parses TOML and validates the result.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` for malformed TOML or unknown keys, otherwise any
    /// error from [`EngineConfig::validate`].
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(s).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    #[must_use]
    pub const fn window_tick_interval(&self) -> Duration {
        Duration::from_millis(self.window_tick_interval_ms)
    }

    /// Rejects configurations the engine cannot run with.
    ///
    /// # Errors
    ///
    /// The first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qoe_buffer_limit == 0 {
            return Err(non_positive("qoe_buffer_limit", f64::from(self.qoe_buffer_limit)));
        }
        if self.bonus_trips_threshold == 0 {
            return Err(non_positive("bonus_trips_threshold", f64::from(self.bonus_trips_threshold)));
        }
        if !(self.bonus_rating_threshold.is_finite() && self.bonus_rating_threshold > 0.0) {
            return Err(non_positive("bonus_rating_threshold", self.bonus_rating_threshold));
        }
        if self.viral_high_threshold == 0 {
            return Err(non_positive("viral_high_threshold", 0.0));
        }
        if self.viral_rising_threshold >= self.viral_high_threshold {
            return Err(ConfigError::RisingAboveHigh {
                rising: self.viral_rising_threshold,
                high: self.viral_high_threshold,
            });
        }
        if self.window_tick_interval_ms == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.shards == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "shards".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "queue_capacity".to_string(),
            });
        }
        self.build_filter().map(|_| ())
    }

    /// Builds the admission filter described by this configuration.
    ///
    /// # Errors
    ///
    /// Keyword set problems (see [`Filter::new`]).
    pub fn build_filter(&self) -> Result<Filter, ConfigError> {
        Filter::new(
            self.filter_enabled,
            self.filtered_kinds.iter().copied(),
            self.blocklist.iter().map(String::as_str),
            self.keyword_set.iter().map(String::as_str),
            self.always_admit_category.as_deref(),
        )
    }
}

fn non_positive(name: &str, value: f64) -> ConfigError {
    ConfigError::NonPositiveThreshold {
        name: name.to_string(),
        value,
    }
}
