//! Abstract state store contract.
//!
//! The store is the only component that mutates `EntityState`. Implementations
//! must make `apply` atomic per key while letting different keys proceed
//! independently, and must never hold a lock across I/O.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{EntityClass, EntityKey, EntityState, EntityStatus};
use crate::time::Timestamp;

use super::mutation::Mutation;

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    /// A mutation targeted an entity already in a terminal status and the
    /// store is configured to reject it.
    #[error("Invalid transition: entity {key} is {status}")]
    InvalidTransition {
        /// Target entity.
        key: EntityKey,
        /// Status at the time of the attempt.
        status: EntityStatus,
    },

    /// A lock was poisoned by a panicking writer.
    #[error("Poisoned lock: {0}")]
    PoisonedLock(&'static str),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StorageError>;

/// How `apply` treats entities that already reached a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPolicy {
    /// Leave the state untouched and return it.
    #[default]
    Ignore,
    /// Fail with `StorageError::InvalidTransition`.
    Reject,
}

/// Storage trait for per-entity state.
pub trait StateStore: Send + Sync {
    /// Current state for `key`, if it exists.
    fn get(&self, key: &EntityKey) -> StoreResult<Option<EntityState>>;

    /// Returns the state for `key`, creating it with `class` defaults first.
    fn get_or_create(&self, key: &EntityKey, class: EntityClass, at: Timestamp) -> StoreResult<EntityState>;

    /// Atomic read-modify-write. Creates the entity lazily.
    ///
    /// Returns the post-mutation record. If the mutation removes the entity,
    /// the returned record is the final state before removal.
    ///
    /// # Errors
    /// - `InvalidTransition`: entity is terminal and the policy is `Reject`
    fn apply(
        &self,
        key: &EntityKey,
        class: EntityClass,
        mutation: &Mutation,
        at: Timestamp,
    ) -> StoreResult<EntityState>;

    /// Read-decide-write under a single lock.
    ///
    /// `decide` sees the current record (`None` if absent) and returns the
    /// mutation to apply. An empty mutation on an absent key creates nothing,
    /// and the result is then `None`. A non-empty mutation on a terminal
    /// entity is subject to the terminal policy.
    ///
    /// # Errors
    /// - `InvalidTransition`: entity is terminal and the policy is `Reject`
    fn update(
        &self,
        key: &EntityKey,
        class: EntityClass,
        at: Timestamp,
        decide: &mut dyn FnMut(Option<&EntityState>) -> Mutation,
    ) -> StoreResult<Option<EntityState>>;

    /// Applies `mutation` only if the entity exists and is in `expected`
    /// status. Returns `None` when the condition does not hold.
    fn transition_if(
        &self,
        key: &EntityKey,
        expected: EntityStatus,
        mutation: &Mutation,
        at: Timestamp,
    ) -> StoreResult<Option<EntityState>>;

    /// Point-in-time copy of every entity matching `predicate`, ordered by key.
    fn snapshot_where(&self, predicate: &dyn Fn(&EntityState) -> bool) -> StoreResult<Vec<EntityState>>;

    /// Removes an entity, returning its last state.
    fn remove(&self, key: &EntityKey) -> StoreResult<Option<EntityState>>;

    /// Number of resident entities.
    fn len(&self) -> StoreResult<usize>;

    /// True if no entities are resident.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
