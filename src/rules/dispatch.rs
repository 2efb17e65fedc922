//! Driver availability and demand assignment alerts.
//!
//! A `DRIVER_PING` is the only way a BUSY driver becomes matchable again.
//! `ORDER_READY` never touches state here: the engine has already run the
//! matcher and claimed the winner, and this rule turns the result into an
//! alert.

use crate::alert::{attrs, Alert, AlertKind};
use crate::error::ValidationError;
use crate::event::{Event, EventKind};
use crate::matcher::MatchResult;
use crate::storage::Mutation;

use super::{Decision, EvalContext};

/// Evaluates a `DRIVER_PING` or `ORDER_READY`.
///
/// # Errors
///
/// Missing or out-of-range coordinates, or an unsupported ping status.
pub fn evaluate(event: &Event, ctx: &EvalContext<'_>) -> Result<Decision, ValidationError> {
    let location = event.location()?;

    if event.kind == EventKind::DriverPing {
        let status = event.reported_status()?;
        return Ok(Decision::applied(
            Mutation::new().set_location(location).set_status(status),
        ));
    }

    let empty = MatchResult::empty();
    let result = ctx.match_result.unwrap_or(&empty);
    let alert = match (&result.matched_entity_key, result.distance) {
        (Some(driver), Some(distance)) => {
            Alert::new(AlertKind::MatchSuccess, event.entity_key.clone(), distance, event.ingest_time)
                .with(attrs::MATCHED_ENTITY, driver.as_str())
        }
        _ => Alert::new(AlertKind::MatchFailed, event.entity_key.clone(), 0.0, event.ingest_time),
    };

    Ok(Decision::applied(Mutation::new()).with_alert(alert.with(attrs::DEMAND_LOCATION, location.to_string())))
}
