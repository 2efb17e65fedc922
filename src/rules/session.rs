//! Playback session lifecycle and QoE degradation.
//!
//! ```text
//! NONE --start--> ACTIVE --heartbeat/buffer--> ACTIVE --end--> ENDED
//! ```
//!
//! Heartbeat, buffer and end events for a session that never started are
//! no-ops. `QOE_CRITICAL` fires the first time the buffer count reaches the
//! limit and is latched by the `qoe_alerted` flag until the session ends.

use crate::alert::{attrs, Alert, AlertKind};
use crate::entity::{fields, EntityState, EntityStatus, LifecyclePolicy};
use crate::event::{payload, Event, EventKind};
use crate::storage::Mutation;
use crate::value::Value;

use super::{Decision, IgnoreReason, RuleConfig};

/// Evaluates one session event. Never fails: session events carry no
/// required payload.
#[must_use]
pub fn evaluate(config: &RuleConfig, prior: Option<&EntityState>, event: &Event) -> Decision {
    let status = prior.map_or(EntityStatus::None, |s| s.status);

    match (event.kind, status) {
        (EventKind::SessionStart, EntityStatus::Active) => Decision::ignored(IgnoreReason::DuplicateStart),
        (EventKind::SessionStart, _) => start(event),
        (_, EntityStatus::Active) => match (event.kind, prior) {
            (EventKind::Heartbeat, _) => Decision::applied(Mutation::new().increment(fields::HEARTBEATS, 1)),
            (EventKind::Buffer, Some(state)) => buffer(config, state, event),
            (EventKind::SessionEnd, Some(state)) => end(config, state, event),
            _ => Decision::ignored(IgnoreReason::UnknownEntity),
        },
        _ => Decision::ignored(IgnoreReason::UnknownEntity),
    }
}

fn start(event: &Event) -> Decision {
    let mut mutation = Mutation::new()
        .restart(event.ingest_time)
        .set_status(EntityStatus::Active)
        .set_counter(fields::BUFFER_COUNT, 0)
        .set_counter(fields::HEARTBEATS, 0);
    if let Some(title) = event.opt_str(payload::TITLE) {
        mutation = mutation.set_attribute(fields::TITLE, title);
    }
    Decision::applied(mutation)
}

fn buffer(config: &RuleConfig, state: &EntityState, event: &Event) -> Decision {
    let count = state.counter(fields::BUFFER_COUNT).saturating_add(1);
    let mut decision = Decision::applied(Mutation::new().increment(fields::BUFFER_COUNT, 1));

    if count >= i64::from(config.qoe_buffer_limit) && !state.flag(fields::QOE_ALERTED) {
        decision.mutation = decision.mutation.raise_flag(fields::QOE_ALERTED);
        #[allow(clippy::cast_precision_loss)]
        let alert = with_title(
            Alert::new(AlertKind::QoeCritical, event.entity_key.clone(), count as f64, event.ingest_time)
                .with(attrs::BUFFER_COUNT, count),
            state,
        );
        decision = decision.with_alert(alert);
    }
    decision
}

fn end(config: &RuleConfig, state: &EntityState, event: &Event) -> Decision {
    let started = state.started_at.unwrap_or(event.ingest_time);
    let duration = event.ingest_time.seconds_since(started).max(0.0);

    let mut mutation = Mutation::new().set_status(EntityStatus::Ended);
    if config.session_lifecycle == LifecyclePolicy::RemoveOnEnd {
        mutation = mutation.remove();
    }

    let summary = with_title(
        Alert::new(AlertKind::SessionSummary, event.entity_key.clone(), duration, event.ingest_time)
            .with(attrs::BUFFER_COUNT, state.counter(fields::BUFFER_COUNT)),
        state,
    );
    Decision::applied(mutation).with_alert(summary)
}

fn with_title(alert: Alert, state: &EntityState) -> Alert {
    match state.attribute(fields::TITLE).and_then(Value::as_str) {
        Some(title) => alert.with(attrs::TITLE, title),
        None => alert,
    }
}
