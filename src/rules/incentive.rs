//! Driver incentive: unlock a bonus once trips and rating both clear their
//! thresholds. The `bonus_unlocked` flag is never cleared, so the alert fires
//! at most once per driver for the lifetime of the engine.

use crate::alert::{attrs, Alert, AlertKind};
use crate::entity::{fields, EntityState};
use crate::error::ValidationError;
use crate::event::{payload, Event, EventKind};
use crate::storage::Mutation;

use super::{Decision, RuleConfig};

/// Evaluates a `TRIP_UPDATE` or `RATING_UPDATE`.
///
/// # Errors
///
/// The `trips` or `rating` payload field is missing or mistyped.
pub fn evaluate(config: &RuleConfig, prior: Option<&EntityState>, event: &Event) -> Result<Decision, ValidationError> {
    let prior_trips = prior.map_or(0, |s| s.counter(fields::TRIPS));
    let prior_rating = prior
        .and_then(|s| s.gauge(fields::RATING))
        .unwrap_or(fields::DEFAULT_RATING);

    let (trips, rating, mutation) = match event.kind {
        EventKind::TripUpdate => {
            let trips = event.int_field(payload::TRIPS)?;
            (trips, prior_rating, Mutation::new().set_counter(fields::TRIPS, trips))
        }
        _ => {
            let rating = event.float_field(payload::RATING)?;
            (prior_trips, rating, Mutation::new().set_gauge(fields::RATING, rating))
        }
    };

    let already = prior.is_some_and(|s| s.flag(fields::BONUS_UNLOCKED));
    let qualifies = trips >= i64::from(config.bonus_trips_threshold) && rating >= config.bonus_rating_threshold;

    if already || !qualifies {
        return Ok(Decision::applied(mutation));
    }

    #[allow(clippy::cast_precision_loss)]
    let alert = Alert::new(AlertKind::BonusUnlocked, event.entity_key.clone(), trips as f64, event.ingest_time)
        .with(attrs::TRIPS, trips)
        .with(attrs::RATING, rating);
    Ok(Decision::applied(mutation.raise_flag(fields::BONUS_UNLOCKED)).with_alert(alert))
}
