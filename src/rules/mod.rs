//! Rule evaluation.
//!
//! The evaluator is a pure function of `(prior state, event, context)`. It
//! never touches the store: it returns the mutation the store should apply
//! and the alerts to emit. The engine runs it inside `StateStore::update`, so
//! the prior state it sees is exactly the state the mutation lands on, which
//! is what makes sticky-flag alerts fire at most once per key.
//!
//! One submodule per rule family:
//! - [`session`]: playback lifecycle and QoE degradation
//! - [`incentive`]: driver bonus unlock
//! - [`dispatch`]: driver availability and demand matching alerts
//! - [`velocity`]: interaction counts and trend alerts
//! - [`message`]: admitted free-text messages

pub mod dispatch;
pub mod incentive;
pub mod message;
pub mod session;
pub mod velocity;

use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::config::EngineConfig;
use crate::entity::{EntityClass, EntityState, LifecyclePolicy};
use crate::error::ValidationError;
use crate::event::{Event, EventKind};
use crate::filter::FilterDecision;
use crate::matcher::MatchResult;
use crate::storage::Mutation;
use crate::window::WindowObservation;

/// Thresholds and policies the rules read.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub qoe_buffer_limit: u32,
    pub bonus_trips_threshold: u32,
    pub bonus_rating_threshold: f64,
    pub viral_high_threshold: u64,
    pub viral_rising_threshold: u64,
    pub session_lifecycle: LifecyclePolicy,
    pub emit_filter_pass: bool,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RuleConfig {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            qoe_buffer_limit: cfg.qoe_buffer_limit,
            bonus_trips_threshold: cfg.bonus_trips_threshold,
            bonus_rating_threshold: cfg.bonus_rating_threshold,
            viral_high_threshold: cfg.viral_high_threshold,
            viral_rising_threshold: cfg.viral_rising_threshold,
            session_lifecycle: cfg.session_lifecycle,
            emit_filter_pass: cfg.emit_filter_pass,
        }
    }
}

/// Inputs the engine computes before evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    /// Window counts around this event's increment (velocity events).
    pub window: Option<WindowObservation>,
    /// Claimed match for this event (demand events).
    pub match_result: Option<&'a MatchResult>,
    /// Admission decision (filtered events).
    pub filter: Option<FilterDecision>,
}

/// Why an event left state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The key's lifecycle never started.
    UnknownEntity,
    /// SESSION_START for a session that is already ACTIVE.
    DuplicateStart,
    /// The entity already reached a terminal status.
    Terminal,
    /// The key belongs to an entity of another class.
    ClassMismatch {
        found: EntityClass,
    },
}

/// Evaluation outcome.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Outcome {
    #[default]
    Applied,
    Ignored(IgnoreReason),
}

/// What the store should do and what to emit.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision {
    pub mutation: Mutation,
    pub alerts: Vec<Alert>,
    pub outcome: Outcome,
}

impl Decision {
    #[must_use]
    pub fn applied(mutation: Mutation) -> Self {
        Self {
            mutation,
            alerts: Vec::new(),
            outcome: Outcome::Applied,
        }
    }

    /// No mutation, no alerts.
    #[must_use]
    pub fn ignored(reason: IgnoreReason) -> Self {
        Self {
            mutation: Mutation::new(),
            alerts: Vec::new(),
            outcome: Outcome::Ignored(reason),
        }
    }

    #[must_use]
    pub fn with_alert(mut self, alert: Alert) -> Self {
        self.alerts.push(alert);
        self
    }

    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self.outcome, Outcome::Applied)
    }
}

/// Stateless rule evaluator.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator {
    config: RuleConfig,
}

impl RuleEvaluator {
    #[must_use]
    pub const fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Evaluates `event` against the entity's prior state.
    ///
    /// # Errors
    ///
    /// Payload fields the rule needs are missing or mistyped. The engine
    /// validates events first, so this only fires for unvalidated input.
    pub fn evaluate(
        &self,
        prior: Option<&EntityState>,
        event: &Event,
        ctx: &EvalContext<'_>,
    ) -> Result<Decision, ValidationError> {
        if let Some(state) = prior {
            if state.class != event.entity_class() {
                return Ok(Decision::ignored(IgnoreReason::ClassMismatch { found: state.class }));
            }
            if state.status.is_terminal() {
                return Ok(Decision::ignored(IgnoreReason::Terminal));
            }
        }

        match event.kind {
            EventKind::SessionStart | EventKind::Heartbeat | EventKind::Buffer | EventKind::SessionEnd => {
                Ok(session::evaluate(&self.config, prior, event))
            }
            EventKind::TripUpdate | EventKind::RatingUpdate => incentive::evaluate(&self.config, prior, event),
            EventKind::DriverPing | EventKind::OrderReady => dispatch::evaluate(event, ctx),
            EventKind::Interaction => Ok(velocity::evaluate(&self.config, event, ctx)),
            EventKind::Message => Ok(message::evaluate(&self.config, prior, event, ctx)),
        }
    }
}
