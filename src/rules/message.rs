//! Admitted free-text messages.

use crate::alert::{attrs, Alert, AlertKind};
use crate::entity::{fields, EntityState};
use crate::event::{payload, Event};
use crate::filter::FilterDecision;
use crate::storage::Mutation;

use super::{Decision, EvalContext, RuleConfig};

/// Counts the message against its author. Emits `FILTER_PASS` when enabled
/// and the filter actually admitted the event (not merely bypassed it).
#[must_use]
pub fn evaluate(config: &RuleConfig, prior: Option<&EntityState>, event: &Event, ctx: &EvalContext<'_>) -> Decision {
    let decision = Decision::applied(Mutation::new().increment(fields::MESSAGES, 1));
    if !config.emit_filter_pass || ctx.filter != Some(FilterDecision::Admit) {
        return decision;
    }

    let count = prior.map_or(0, |s| s.counter(fields::MESSAGES)).saturating_add(1);
    #[allow(clippy::cast_precision_loss)]
    let mut alert = Alert::new(AlertKind::FilterPass, event.entity_key.clone(), count as f64, event.ingest_time);
    if let Some(text) = event.opt_str(payload::TEXT) {
        alert = alert.with(attrs::TEXT, text);
    }
    if let Some(topic) = event.opt_str(payload::TOPIC) {
        alert = alert.with(attrs::TOPIC, topic);
    }
    decision.with_alert(alert)
}
