//! Interaction velocity.
//!
//! The window aggregator reports the count before and after this event's
//! increment. An alert fires only when the threshold level rises across that
//! step, so each level (`RISING`, then `VIRAL_TREND`) fires at most once per
//! window. A tick resets the count and re-arms both levels.

use crate::alert::{attrs, Alert, AlertKind};
use crate::entity::fields;
use crate::event::Event;
use crate::storage::Mutation;
use crate::window::threshold_check;

use super::{Decision, EvalContext, RuleConfig};

const fn rank(level: Option<AlertKind>) -> u8 {
    match level {
        Some(AlertKind::ViralTrend) => 2,
        Some(_) => 1,
        None => 0,
    }
}

/// Evaluates an `INTERACTION`.
#[must_use]
pub fn evaluate(config: &RuleConfig, event: &Event, ctx: &EvalContext<'_>) -> Decision {
    let decision = Decision::applied(Mutation::new().increment(fields::INTERACTIONS, 1));
    let Some(obs) = ctx.window else {
        return decision;
    };

    let high = config.viral_high_threshold;
    let rising = config.viral_rising_threshold;
    let before = threshold_check(obs.previous, high, rising);
    let after = threshold_check(obs.current, high, rising);

    match after {
        Some(kind) if rank(after) > rank(before) => {
            #[allow(clippy::cast_precision_loss)]
            let alert = Alert::new(kind, event.entity_key.clone(), obs.current as f64, event.ingest_time)
                .with(attrs::RISING_THRESHOLD, rising)
                .with(attrs::HIGH_THRESHOLD, high);
            decision.with_alert(alert)
        }
        _ => decision,
    }
}
