//! In-memory sharded state store.
//!
//! Keys are routed to one of N shards by a stable hash; each shard is a
//! `RwLock<HashMap>`. A mutation holds exactly one shard's write lock for the
//! duration of the read-modify-write and nothing else, so different shards
//! never contend and no lock is ever held across I/O.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};

use crate::entity::{EntityClass, EntityKey, EntityState, EntityStatus};
use crate::storage::mutation::Mutation;
use crate::storage::traits::{StateStore, StorageError, StoreResult, TerminalPolicy};
use crate::time::Timestamp;

type Shard = HashMap<EntityKey, EntityState>;

/// Thread-safe sharded entity store.
#[derive(Debug)]
pub struct ShardedStateStore {
    shards: Vec<RwLock<Shard>>,
    terminal_policy: TerminalPolicy,
}

impl Default for ShardedStateStore {
    fn default() -> Self {
        Self::new(1, TerminalPolicy::default())
    }
}

impl ShardedStateStore {
    /// Create a new empty store with `shards` partitions (at least one).
    #[must_use]
    pub fn new(shards: usize, terminal_policy: TerminalPolicy) -> Self {
        let shards = (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect();
        Self {
            shards,
            terminal_policy,
        }
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub const fn terminal_policy(&self) -> TerminalPolicy {
        self.terminal_policy
    }

    /// Shard index owning `key`. The runtime uses the same routing so each
    /// worker only ever writes to its own shard.
    #[must_use]
    pub fn shard_of(&self, key: &EntityKey) -> usize {
        key.shard(self.shards.len())
    }

    fn shard(&self, key: &EntityKey) -> &RwLock<Shard> {
        &self.shards[self.shard_of(key)]
    }

    fn finish(shard: &mut Shard, key: &EntityKey, state: EntityState, mutation: &Mutation) -> EntityState {
        if mutation.removes() {
            shard.remove(key);
        } else {
            shard.insert(key.clone(), state.clone());
        }
        state
    }
}

impl StateStore for ShardedStateStore {
    fn get(&self, key: &EntityKey) -> StoreResult<Option<EntityState>> {
        let shard = self
            .shard(key)
            .read()
            .map_err(|_| StorageError::PoisonedLock("state.get"))?;
        Ok(shard.get(key).cloned())
    }

    fn get_or_create(&self, key: &EntityKey, class: EntityClass, at: Timestamp) -> StoreResult<EntityState> {
        let mut shard = self
            .shard(key)
            .write()
            .map_err(|_| StorageError::PoisonedLock("state.get_or_create"))?;
        let state = shard
            .entry(key.clone())
            .or_insert_with(|| EntityState::new(key.clone(), class, at));
        Ok(state.clone())
    }

    fn apply(
        &self,
        key: &EntityKey,
        class: EntityClass,
        mutation: &Mutation,
        at: Timestamp,
    ) -> StoreResult<EntityState> {
        let mut shard = self
            .shard(key)
            .write()
            .map_err(|_| StorageError::PoisonedLock("state.apply"))?;

        let mut state = match shard.get(key) {
            Some(existing) => existing.clone(),
            None => EntityState::new(key.clone(), class, at),
        };

        if state.status.is_terminal() {
            return match self.terminal_policy {
                TerminalPolicy::Ignore => Ok(state),
                TerminalPolicy::Reject => Err(StorageError::InvalidTransition {
                    key: key.clone(),
                    status: state.status,
                }),
            };
        }

        mutation.apply_to(&mut state, at);
        Ok(Self::finish(&mut shard, key, state, mutation))
    }

    fn update(
        &self,
        key: &EntityKey,
        class: EntityClass,
        at: Timestamp,
        decide: &mut dyn FnMut(Option<&EntityState>) -> Mutation,
    ) -> StoreResult<Option<EntityState>> {
        let mut shard = self
            .shard(key)
            .write()
            .map_err(|_| StorageError::PoisonedLock("state.update"))?;

        let current = shard.get(key);
        let mutation = decide(current);
        if mutation.is_empty() {
            return Ok(current.cloned());
        }

        let mut state = match current {
            Some(existing) => existing.clone(),
            None => EntityState::new(key.clone(), class, at),
        };
        if state.status.is_terminal() {
            return match self.terminal_policy {
                TerminalPolicy::Ignore => Ok(Some(state)),
                TerminalPolicy::Reject => Err(StorageError::InvalidTransition {
                    key: key.clone(),
                    status: state.status,
                }),
            };
        }

        mutation.apply_to(&mut state, at);
        Ok(Some(Self::finish(&mut shard, key, state, &mutation)))
    }

    fn transition_if(
        &self,
        key: &EntityKey,
        expected: EntityStatus,
        mutation: &Mutation,
        at: Timestamp,
    ) -> StoreResult<Option<EntityState>> {
        let mut shard = self
            .shard(key)
            .write()
            .map_err(|_| StorageError::PoisonedLock("state.transition_if"))?;

        let Some(current) = shard.get(key) else {
            return Ok(None);
        };
        if current.status != expected {
            return Ok(None);
        }

        let mut state = current.clone();
        mutation.apply_to(&mut state, at);
        Ok(Some(Self::finish(&mut shard, key, state, mutation)))
    }

    fn snapshot_where(&self, predicate: &dyn Fn(&EntityState) -> bool) -> StoreResult<Vec<EntityState>> {
        // Take every read lock (in shard order) before copying so the result
        // is one consistent cut across shards. Writers only ever hold a single
        // shard lock, so ordered acquisition cannot deadlock.
        let guards: Vec<RwLockReadGuard<'_, Shard>> = self
            .shards
            .iter()
            .map(|s| s.read().map_err(|_| StorageError::PoisonedLock("state.snapshot")))
            .collect::<Result<_, _>>()?;

        let mut out: Vec<EntityState> = guards
            .iter()
            .flat_map(|g| g.values())
            .filter(|s| predicate(s))
            .cloned()
            .collect();
        drop(guards);

        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn remove(&self, key: &EntityKey) -> StoreResult<Option<EntityState>> {
        let mut shard = self
            .shard(key)
            .write()
            .map_err(|_| StorageError::PoisonedLock("state.remove"))?;
        Ok(shard.remove(key))
    }

    fn len(&self) -> StoreResult<usize> {
        let mut total = 0;
        for s in &self.shards {
            total += s.read().map_err(|_| StorageError::PoisonedLock("state.len"))?.len();
        }
        Ok(total)
    }
}
