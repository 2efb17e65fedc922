//! # KyroStream - Stateful Real-Time Event Processing
//!
//! KyroStream consumes keyed events from many producers and keeps a small,
//! mutable state record per entity (a viewing session, a driver, a post).
//! Each incoming event is checked against that state, the state is updated,
//! and alerts are emitted when a rule crosses a threshold. The threshold is
//! crossed once, so the alert fires once.
//!
//! ## Core Concepts
//!
//! - **Event**: an immutable, keyed fact (`SESSION_START`, `DRIVER_PING`, ...)
//! - **Entity state**: counters, gauges, flags and a lifecycle status per key
//! - **Window**: a tumbling per-key count, closed on a fixed tick
//! - **Rule**: a pure function from (prior state, event) to a mutation plus alerts
//! - **Matcher**: nearest-IDLE-supply selection for a demand event
//!
//! ## Usage
//!
//! ```rust
//! use kyrostream::{AlertKind, Engine, EngineConfig, Event, EventKind, ManualClock, Timestamp};
//!
//! let engine = Engine::new(EngineConfig::default(), ManualClock::new(Timestamp::EPOCH))?;
//!
//! engine.process(&Event::new("user_42", EventKind::SessionStart, Timestamp::from_millis(0)));
//! let mut alerts = Vec::new();
//! for ms in 1..=3 {
//!     let outputs = engine.process(&Event::new("user_42", EventKind::Buffer, Timestamp::from_millis(ms)));
//!     alerts.extend(outputs.iter().filter_map(|o| o.as_alert().map(|a| a.kind)));
//! }
//! assert_eq!(alerts, vec![AlertKind::QoeCritical]);
//! # Ok::<(), kyrostream::StreamError>(())
//! ```
//!
//! For concurrent ingestion wrap the engine in a [`StreamRuntime`], which
//! routes every key to one shard worker and drives window ticks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod alert;
pub mod entity;
pub mod error;
pub mod event;
pub mod time;
pub mod value;

// State and processing
pub mod config;
pub mod filter;
pub mod matcher;
pub mod rules;
pub mod storage;
pub mod window;

// Pipeline
pub mod engine;
pub mod ingress;

// Re-export primary types at crate root for convenience
pub use alert::{Alert, AlertKind};
pub use config::{EngineConfig, UnknownEntityPolicy};
pub use engine::{
    CallbackSink, ChannelSink, Engine, EngineOutput, LogSink, MatchOutcome, MemorySink, OutputSink, OutputStream,
    StatsSnapshot, StreamRuntime,
};
pub use entity::{EntityClass, EntityKey, EntityState, EntityStatus, LifecyclePolicy, Location};
pub use error::{ConfigError, ExecutionError, StreamError, StreamResult, ValidationError};
pub use event::{Event, EventKind};
pub use filter::{Filter, FilterDecision};
pub use matcher::{MatchRequest, MatchResult, Matcher};
pub use rules::RuleEvaluator;
pub use storage::{ShardedStateStore, StateStore, StorageError, TerminalPolicy};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use value::Value;
