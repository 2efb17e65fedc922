//! Tumbling per-key counters for velocity detection.
//!
//! Each key has one counter that grows on matching events and is reset to
//! exactly zero on every `tick`. Ticks come from the engine's clock-driven
//! schedule, never from event arrival, so the aggregation is tumbling by
//! wall-clock interval rather than a true sliding window.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::alert::AlertKind;
use crate::entity::EntityKey;
use crate::storage::StorageError;
use crate::time::Timestamp;

/// Counter state for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub key: EntityKey,
    pub count: u64,
    pub window_start: Timestamp,
}

/// Count before and after an increment.
///
/// The rule evaluator compares threshold levels across the two values to
/// detect an edge crossing without any extra state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowObservation {
    pub previous: u64,
    pub current: u64,
}

/// Windows closed by a tick.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub at: Timestamp,
    /// Windows that held a non-zero count when the tick fired, ordered by key.
    pub closed: Vec<Window>,
}

impl TickReport {
    /// Total events counted across all closed windows.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.closed.iter().map(|w| w.count).sum()
    }
}

/// Level for a count: `VIRAL_TREND` above `high`, `RISING` above `rising`.
///
/// # Examples
///
/// ```
/// use kyrostream::window::threshold_check;
/// use kyrostream::AlertKind;
///
/// assert_eq!(threshold_check(20, 15, 5), Some(AlertKind::ViralTrend));
/// assert_eq!(threshold_check(15, 15, 5), Some(AlertKind::Rising));
/// assert_eq!(threshold_check(5, 15, 5), None);
/// ```
#[must_use]
pub const fn threshold_check(count: u64, high: u64, rising: u64) -> Option<AlertKind> {
    if count > high {
        Some(AlertKind::ViralTrend)
    } else if count > rising {
        Some(AlertKind::Rising)
    } else {
        None
    }
}

/// Sharded tumbling-window aggregator.
#[derive(Debug)]
pub struct WindowAggregator {
    shards: Vec<Mutex<HashMap<EntityKey, Window>>>,
}

impl WindowAggregator {
    #[must_use]
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &EntityKey) -> &Mutex<HashMap<EntityKey, Window>> {
        &self.shards[key.shard(self.shards.len())]
    }

    /// Adds one to `key`'s window.
    ///
    /// # Errors
    ///
    /// Poisoned shard lock.
    pub fn increment(&self, key: &EntityKey, at: Timestamp) -> Result<WindowObservation, StorageError> {
        let mut shard = self
            .shard(key)
            .lock()
            .map_err(|_| StorageError::PoisonedLock("window.increment"))?;
        let window = shard.entry(key.clone()).or_insert_with(|| Window {
            key: key.clone(),
            count: 0,
            window_start: at,
        });
        let previous = window.count;
        window.count = window.count.saturating_add(1);
        Ok(WindowObservation {
            previous,
            current: window.count,
        })
    }

    /// Resets every window to zero. Windows that were already zero are
    /// dropped from memory instead of being carried forward.
    ///
    /// # Errors
    ///
    /// Poisoned shard lock. Shards before the poisoned one have already been
    /// reset.
    pub fn tick(&self, at: Timestamp) -> Result<TickReport, StorageError> {
        let mut closed = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().map_err(|_| StorageError::PoisonedLock("window.tick"))?;
            shard.retain(|_, w| {
                if w.count == 0 {
                    return false;
                }
                closed.push(w.clone());
                w.count = 0;
                w.window_start = at;
                true
            });
        }
        closed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(TickReport { at, closed })
    }

    /// Resets a single key's window, returning the count it held.
    ///
    /// # Errors
    ///
    /// Poisoned shard lock.
    pub fn decay(&self, key: &EntityKey, at: Timestamp) -> Result<u64, StorageError> {
        let mut shard = self
            .shard(key)
            .lock()
            .map_err(|_| StorageError::PoisonedLock("window.decay"))?;
        Ok(shard.get_mut(key).map_or(0, |w| {
            let held = w.count;
            w.count = 0;
            w.window_start = at;
            held
        }))
    }

    /// Current count for `key` (0 if it has no window).
    ///
    /// # Errors
    ///
    /// Poisoned shard lock.
    pub fn count(&self, key: &EntityKey) -> Result<u64, StorageError> {
        let shard = self
            .shard(key)
            .lock()
            .map_err(|_| StorageError::PoisonedLock("window.count"))?;
        Ok(shard.get(key).map_or(0, |w| w.count))
    }

    /// Number of tracked windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().map_or(0, |g| g.len()))
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
