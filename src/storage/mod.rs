//! Entity state storage.
//!
//! `StateStore` is the abstract contract; `ShardedStateStore` is the in-memory
//! backend used by the engine. State is not durable across restarts.

mod memory;
mod mutation;
mod traits;

pub use memory::ShardedStateStore;
pub use mutation::{Mutation, MutationOp};
pub use traits::{StateStore, StorageError, StoreResult, TerminalPolicy};
