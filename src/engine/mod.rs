//! Stream engine.
//!
//! `Engine` wires the per-event pipeline together:
//!
//! ```text
//! validate -> filter -> (window increment | match + claim) -> rules -> store
//! ```
//!
//! It is synchronous and `Sync`: call `process` from as many threads as you
//! like. Per-key ordering is the caller's responsibility; `runtime` provides
//! it by routing each key to exactly one shard worker.

/// Sharded worker runtime.
pub mod runtime;
/// Output sinks.
pub mod sink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::alert::Alert;
use crate::config::{EngineConfig, UnknownEntityPolicy};
use crate::entity::{fields, EntityClass, EntityKey, EntityState, EntityStatus};
use crate::error::{ExecutionError, StreamError, StreamResult};
use crate::event::{Event, EventKind};
use crate::filter::{Filter, FilterDecision};
use crate::matcher::{MatchRequest, MatchResult, Matcher};
use crate::rules::{Decision, EvalContext, IgnoreReason, Outcome, RuleConfig, RuleEvaluator};
use crate::storage::{Mutation, ShardedStateStore, StateStore, TerminalPolicy};
use crate::time::{Clock, TickSchedule, Timestamp};
use crate::window::{TickReport, WindowAggregator};

pub use runtime::StreamRuntime;
pub use sink::{CallbackSink, ChannelSink, LogSink, MemorySink, OutputSink, OutputStream};

/// A demand event and what it was matched to.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub demand_id: EntityKey,
    pub result: MatchResult,
}

/// Something the engine produced for an event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineOutput {
    Alert(Alert),
    Match(MatchOutcome),
}

impl EngineOutput {
    #[must_use]
    pub const fn as_alert(&self) -> Option<&Alert> {
        match self {
            Self::Alert(alert) => Some(alert),
            Self::Match(_) => None,
        }
    }

    #[must_use]
    pub const fn as_match(&self) -> Option<&MatchOutcome> {
        match self {
            Self::Match(outcome) => Some(outcome),
            Self::Alert(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    received: AtomicU64,
    processed: AtomicU64,
    malformed: AtomicU64,
    blocked: AtomicU64,
    irrelevant: AtomicU64,
    unknown_entity: AtomicU64,
    invalid_transitions: AtomicU64,
    class_mismatches: AtomicU64,
    alerts: AtomicU64,
    matches: AtomicU64,
    match_failures: AtomicU64,
    ticks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the engine counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    /// Events that reached rule evaluation and completed without error.
    pub processed: u64,
    pub malformed: u64,
    pub blocked: u64,
    pub irrelevant: u64,
    pub unknown_entity: u64,
    pub invalid_transitions: u64,
    /// Events whose key already belongs to an entity of another class.
    pub class_mismatches: u64,
    pub alerts: u64,
    pub matches: u64,
    pub match_failures: u64,
    pub ticks: u64,
}

impl Stats {
    fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            processed: load(&self.processed),
            malformed: load(&self.malformed),
            blocked: load(&self.blocked),
            irrelevant: load(&self.irrelevant),
            unknown_entity: load(&self.unknown_entity),
            invalid_transitions: load(&self.invalid_transitions),
            class_mismatches: load(&self.class_mismatches),
            alerts: load(&self.alerts),
            matches: load(&self.matches),
            match_failures: load(&self.match_failures),
            ticks: load(&self.ticks),
        }
    }
}

/// The stream processing engine.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    windows: WindowAggregator,
    filter: Filter,
    matcher: Matcher,
    rules: RuleEvaluator,
    schedule: TickSchedule,
    dispatch: Mutex<()>,
    stats: Stats,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine backed by an in-memory sharded store.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration fails validation.
    pub fn new(config: EngineConfig, clock: impl Clock + 'static) -> StreamResult<Self> {
        let store = Arc::new(ShardedStateStore::new(config.shards, config.terminal_policy));
        Self::with_store(config, clock, store)
    }

    /// Creates an engine over a caller-supplied store.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration fails validation.
    pub fn with_store(
        config: EngineConfig,
        clock: impl Clock + 'static,
        store: Arc<dyn StateStore>,
    ) -> StreamResult<Self> {
        config.validate()?;
        let filter = config.build_filter()?;
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let schedule = TickSchedule::new(config.window_tick_interval(), clock.now());

        Ok(Self {
            windows: WindowAggregator::new(config.shards),
            filter,
            matcher: Matcher::new(),
            rules: RuleEvaluator::new(RuleConfig::from(&config)),
            schedule,
            dispatch: Mutex::new(()),
            stats: Stats::default(),
            store,
            clock,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    #[must_use]
    pub const fn windows(&self) -> &WindowAggregator {
        &self.windows
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current state for `key`.
    ///
    /// # Errors
    ///
    /// Store failure.
    pub fn state(&self, key: &EntityKey) -> StreamResult<Option<EntityState>> {
        Ok(self.store.get(key)?)
    }

    /// Processes one event. Per-event failures are counted and logged, never
    /// returned.
    pub fn process(&self, event: &Event) -> Vec<EngineOutput> {
        self.try_process(event).unwrap_or_default()
    }

    /// Processes one event and reports why it had no effect, if it didn't.
    ///
    /// Filter drops and duplicate starts are not errors and return `Ok` with
    /// no outputs.
    ///
    /// # Errors
    ///
    /// - `Validation`: malformed event
    /// - `Execution(UnknownEntity)`: lifecycle event for a session that never started
    /// - `Execution(InvalidTransition)`: event for a terminal entity under `TerminalPolicy::Reject`
    /// - `Execution(ClassMismatch)`: the key already belongs to an entity of another class
    /// - `Execution(Storage)`: store failure
    pub fn try_process(&self, event: &Event) -> StreamResult<Vec<EngineOutput>> {
        bump(&self.stats.received);
        let result = self.run(event);
        if let Err(err @ (StreamError::Internal { .. } | StreamError::Execution(ExecutionError::Storage { .. }))) =
            &result
        {
            error!(key = %event.entity_key, kind = %event.kind, error = %err, "event processing failed");
        }
        result
    }

    fn run(&self, event: &Event) -> StreamResult<Vec<EngineOutput>> {
        if let Err(err) = event.validate() {
            bump(&self.stats.malformed);
            debug!(key = %event.entity_key, kind = %event.kind, error = %err, "dropping malformed event");
            return Err(err.into());
        }

        let admission = self.filter.decide(event);
        match admission {
            FilterDecision::Blocked => {
                bump(&self.stats.blocked);
                debug!(key = %event.entity_key, "blocked author; dropping event");
                return Ok(Vec::new());
            }
            FilterDecision::Irrelevant => {
                bump(&self.stats.irrelevant);
                debug!(key = %event.entity_key, "irrelevant content; dropping event");
                return Ok(Vec::new());
            }
            FilterDecision::Admit | FilterDecision::Bypass => {}
        }

        let mut outputs = Vec::new();
        let decision = if event.kind == EventKind::OrderReady {
            let request = MatchRequest {
                demand_id: event.entity_key.clone(),
                location: event.location()?,
            };
            let result = self.assign(&request, event.ingest_time)?;
            if result.is_match() {
                bump(&self.stats.matches);
            } else {
                bump(&self.stats.match_failures);
            }
            let ctx = EvalContext {
                match_result: Some(&result),
                filter: Some(admission),
                ..EvalContext::default()
            };
            let decision = self.rules.evaluate(None, event, &ctx)?;
            outputs.push(EngineOutput::Match(MatchOutcome {
                demand_id: request.demand_id,
                result,
            }));
            decision
        } else {
            let window = if event.kind == EventKind::Interaction {
                Some(self.windows.increment(&event.entity_key, event.ingest_time)?)
            } else {
                None
            };
            let ctx = EvalContext {
                window,
                match_result: None,
                filter: Some(admission),
            };
            self.evaluate_and_apply(event, &ctx)?
        };

        match decision.outcome {
            Outcome::Applied => {}
            Outcome::Ignored(reason) => return self.ignored(event, reason),
        }

        bump(&self.stats.processed);
        for alert in decision.alerts {
            bump(&self.stats.alerts);
            info!(kind = %alert.kind, key = %alert.key, value = alert.metric_value, "alert");
            outputs.push(EngineOutput::Alert(alert));
        }
        Ok(outputs)
    }

    /// Runs the rules against the stored state and applies the resulting
    /// mutation under the key's lock.
    fn evaluate_and_apply(&self, event: &Event, ctx: &EvalContext<'_>) -> StreamResult<Decision> {
        let mut decision = None;
        self.store.update(
            &event.entity_key,
            event.entity_class(),
            event.ingest_time,
            &mut |prior: Option<&EntityState>| match self.rules.evaluate(prior, event, ctx) {
                Ok(d) => {
                    let mutation = d.mutation.clone();
                    decision = Some(Ok(d));
                    mutation
                }
                Err(err) => {
                    decision = Some(Err(err));
                    Mutation::new()
                }
            },
        )?;
        decision
            .ok_or_else(|| StreamError::internal("rule evaluation did not run"))?
            .map_err(StreamError::from)
    }

    fn ignored(&self, event: &Event, reason: IgnoreReason) -> StreamResult<Vec<EngineOutput>> {
        let key = &event.entity_key;
        match reason {
            IgnoreReason::DuplicateStart => {
                bump(&self.stats.processed);
                debug!(%key, "session already active; ignoring start");
                Ok(Vec::new())
            }
            IgnoreReason::UnknownEntity => {
                bump(&self.stats.unknown_entity);
                match self.config.unknown_entity_policy {
                    UnknownEntityPolicy::Ignore => debug!(%key, kind = %event.kind, "event for unknown entity"),
                    UnknownEntityPolicy::Warn => warn!(%key, kind = %event.kind, "event for unknown entity"),
                }
                Err(ExecutionError::UnknownEntity {
                    key: key.clone(),
                    kind: event.kind,
                }
                .into())
            }
            IgnoreReason::ClassMismatch { found } => {
                bump(&self.stats.class_mismatches);
                warn!(%key, kind = %event.kind, %found, "event addresses an entity of another class");
                Err(ExecutionError::ClassMismatch {
                    key: key.clone(),
                    kind: event.kind,
                    expected: event.entity_class(),
                    found,
                }
                .into())
            }
            IgnoreReason::Terminal => {
                bump(&self.stats.invalid_transitions);
                match self.config.terminal_policy {
                    TerminalPolicy::Ignore => {
                        debug!(%key, kind = %event.kind, "event for ended entity ignored");
                        Ok(Vec::new())
                    }
                    TerminalPolicy::Reject => {
                        warn!(%key, kind = %event.kind, "event for ended entity rejected");
                        Err(ExecutionError::InvalidTransition {
                            key: key.clone(),
                            status: EntityStatus::Ended,
                            kind: event.kind,
                        }
                        .into())
                    }
                }
            }
        }
    }

    /// Finds the nearest IDLE driver and claims it (IDLE -> BUSY).
    ///
    /// Matches are serialized so two demands never race for the same pool
    /// snapshot. The claim itself is a conditional transition in the store,
    /// so a driver that changed status since the snapshot is skipped and the
    /// next-nearest candidate is tried.
    fn assign(&self, request: &MatchRequest, at: Timestamp) -> StreamResult<MatchResult> {
        let _guard = self
            .dispatch
            .lock()
            .map_err(|_| StreamError::internal("dispatch lock poisoned"))?;

        let mut pool = self
            .store
            .snapshot_where(&|s: &EntityState| s.class == EntityClass::Driver && s.is_idle())?;
        let claim = Mutation::new()
            .set_status(EntityStatus::Busy)
            .increment(fields::ASSIGNMENTS, 1);

        loop {
            let result = self.matcher.match_request(request, &pool);
            let Some(candidate) = result.matched_entity_key.clone() else {
                debug!(demand = %request.demand_id, "no idle driver available");
                return Ok(result);
            };
            if self.store.transition_if(&candidate, EntityStatus::Idle, &claim, at)?.is_some() {
                debug!(demand = %request.demand_id, driver = %candidate, "driver claimed");
                return Ok(result);
            }
            debug!(demand = %request.demand_id, driver = %candidate, "claim lost; retrying");
            pool.retain(|s| s.key != candidate);
        }
    }

    /// Closes the current window for every key.
    ///
    /// # Errors
    ///
    /// Window store failure.
    pub fn tick(&self) -> StreamResult<TickReport> {
        let now = self.clock.now();
        let report = self.windows.tick(now)?;
        bump(&self.stats.ticks);
        info!(at = %now, windows = report.closed.len(), total = report.total(), "window tick");
        Ok(report)
    }

    /// Ticks if the configured interval has elapsed on the engine clock.
    ///
    /// # Errors
    ///
    /// Window store failure.
    pub fn maybe_tick(&self) -> StreamResult<Option<TickReport>> {
        if self.schedule.due(self.clock.now()) {
            self.tick().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Next scheduled tick.
    #[must_use]
    pub fn next_tick_due(&self) -> Timestamp {
        self.schedule.next_due()
    }

    /// Resets a single key's window, returning the count it held.
    ///
    /// # Errors
    ///
    /// Window store failure.
    pub fn decay(&self, key: &EntityKey) -> StreamResult<u64> {
        Ok(self.windows.decay(key, self.clock.now())?)
    }
}
