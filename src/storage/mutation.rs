//! State mutations.
//!
//! The rule evaluator never touches `EntityState` directly. It describes the
//! change as a `Mutation`, and the store applies the whole list atomically
//! under the key's shard lock.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityState, EntityStatus, Location};
use crate::time::Timestamp;
use crate::value::Value;

/// A single state change.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    SetStatus { status: EntityStatus },
    SetCounter { name: String, value: i64 },
    IncrementCounter { name: String, by: i64 },
    SetGauge { name: String, value: f64 },
    /// Sets a sticky flag. There is deliberately no op to clear one; sticky
    /// flags disappear only with the entity.
    RaiseFlag { name: String },
    SetLocation { location: Location },
    SetAttribute { name: String, value: Value },
    /// Starts a fresh lifecycle: clears counters and flags, records the start.
    Restart { at: Timestamp },
    /// Discards the entity once the other ops have been applied.
    Remove,
}

/// Ordered list of ops applied as one unit.
///
/// # Examples
///
/// ```
/// use kyrostream::storage::Mutation;
/// use kyrostream::EntityStatus;
///
/// let m = Mutation::new()
///     .set_status(EntityStatus::Busy)
///     .increment("assignments", 1);
/// assert_eq!(m.len(), 2);
/// assert!(!m.removes());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mutation {
    ops: Vec<MutationOp>,
}

impl Mutation {
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    #[must_use]
    pub fn push(mut self, op: MutationOp) -> Self {
        self.ops.push(op);
        self
    }

    #[must_use]
    pub fn set_status(self, status: EntityStatus) -> Self {
        self.push(MutationOp::SetStatus { status })
    }

    #[must_use]
    pub fn set_counter(self, name: &str, value: i64) -> Self {
        self.push(MutationOp::SetCounter {
            name: name.to_string(),
            value,
        })
    }

    #[must_use]
    pub fn increment(self, name: &str, by: i64) -> Self {
        self.push(MutationOp::IncrementCounter {
            name: name.to_string(),
            by,
        })
    }

    #[must_use]
    pub fn set_gauge(self, name: &str, value: f64) -> Self {
        self.push(MutationOp::SetGauge {
            name: name.to_string(),
            value,
        })
    }

    #[must_use]
    pub fn raise_flag(self, name: &str) -> Self {
        self.push(MutationOp::RaiseFlag {
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn set_location(self, location: Location) -> Self {
        self.push(MutationOp::SetLocation { location })
    }

    #[must_use]
    pub fn set_attribute(self, name: &str, value: impl Into<Value>) -> Self {
        self.push(MutationOp::SetAttribute {
            name: name.to_string(),
            value: value.into(),
        })
    }

    #[must_use]
    pub fn restart(self, at: Timestamp) -> Self {
        self.push(MutationOp::Restart { at })
    }

    #[must_use]
    pub fn remove(self) -> Self {
        self.push(MutationOp::Remove)
    }

    #[must_use]
    pub fn ops(&self) -> &[MutationOp] {
        &self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True if applying this mutation discards the entity.
    #[must_use]
    pub fn removes(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, MutationOp::Remove))
    }

    /// Applies every op to `state` in order and stamps `last_update`.
    ///
    /// `Remove` is not interpreted here; the store handles it after the
    /// other ops have run so the caller still sees the final record.
    pub fn apply_to(&self, state: &mut EntityState, at: Timestamp) {
        for op in &self.ops {
            match op {
                MutationOp::SetStatus { status } => state.status = *status,
                MutationOp::SetCounter { name, value } => {
                    state.counters.insert(name.clone(), *value);
                }
                MutationOp::IncrementCounter { name, by } => {
                    let c = state.counters.entry(name.clone()).or_insert(0);
                    *c = c.saturating_add(*by);
                }
                MutationOp::SetGauge { name, value } => {
                    state.gauges.insert(name.clone(), *value);
                }
                MutationOp::RaiseFlag { name } => {
                    state.sticky_flags.insert(name.clone(), true);
                }
                MutationOp::SetLocation { location } => state.location = Some(*location),
                MutationOp::SetAttribute { name, value } => {
                    state.attributes.insert(name.clone(), value.clone());
                }
                MutationOp::Restart { at } => {
                    state.counters.clear();
                    state.sticky_flags.clear();
                    state.started_at = Some(*at);
                }
                MutationOp::Remove => {}
            }
        }
        state.last_update = state.last_update.max(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityClass, EntityKey};

    fn session() -> EntityState {
        EntityState::new(EntityKey::from("u1"), EntityClass::Session, Timestamp::from_millis(1))
    }

    #[test]
    fn test_ops_apply_in_order() {
        let mut s = session();
        Mutation::new()
            .restart(Timestamp::from_millis(1000))
            .set_status(EntityStatus::Active)
            .increment("buffer_count", 1)
            .increment("buffer_count", 1)
            .set_counter("heartbeats", 7)
            .raise_flag("qoe_alerted")
            .set_attribute("title", "The Crown")
            .apply_to(&mut s, Timestamp::from_millis(1000));

        assert_eq!(s.status, EntityStatus::Active);
        assert_eq!(s.counter("buffer_count"), 2);
        assert_eq!(s.counter("heartbeats"), 7);
        assert!(s.flag("qoe_alerted"));
        assert_eq!(s.started_at, Some(Timestamp::from_millis(1000)));
        assert_eq!(s.attribute("title").and_then(Value::as_str), Some("The Crown"));
        assert_eq!(s.last_update, Timestamp::from_millis(1000));
    }

    #[test]
    fn test_restart_clears_counters_and_flags() {
        let mut s = session();
        Mutation::new()
            .increment("buffer_count", 3)
            .raise_flag("qoe_alerted")
            .apply_to(&mut s, Timestamp::from_millis(5));
        Mutation::new()
            .restart(Timestamp::from_millis(9))
            .apply_to(&mut s, Timestamp::from_millis(9));
        assert_eq!(s.counter("buffer_count"), 0);
        assert!(!s.flag("qoe_alerted"));
    }

    #[test]
    fn test_last_update_never_moves_backwards() {
        let mut s = session();
        Mutation::new().apply_to(&mut s, Timestamp::from_millis(50));
        Mutation::new().apply_to(&mut s, Timestamp::from_millis(20));
        assert_eq!(s.last_update, Timestamp::from_millis(50));
    }

    #[test]
    fn test_removes() {
        assert!(Mutation::new().set_status(EntityStatus::Ended).remove().removes());
        assert!(Mutation::new().is_empty());
    }
}
