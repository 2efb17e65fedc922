//! Nearest-resource assignment for demand events.
//!
//! The matcher is pure: it reads a pool snapshot and picks the closest IDLE
//! candidate. Claiming the winner (IDLE -> BUSY) is the engine's job, done
//! through the state store so a matched entity cannot be matched twice.
//!
//! The scan is O(n) over the pool. A spatial index (grid or k-d tree) is the
//! obvious optimization for large fleets.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKey, EntityState, EntityStatus, Location};

/// Demand to be served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub demand_id: EntityKey,
    pub location: Location,
}

/// Assignment outcome. Both fields are `None` when nothing matched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched_entity_key: Option<EntityKey>,
    pub distance: Option<f64>,
}

impl MatchResult {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            matched_entity_key: None,
            distance: None,
        }
    }

    #[must_use]
    pub const fn is_match(&self) -> bool {
        self.matched_entity_key.is_some()
    }
}

/// Distance between two locations.
pub trait DistanceMetric: Send + Sync {
    /// Non-negative distance; smaller is closer.
    fn distance(&self, a: Location, b: Location) -> f64;
}

/// Euclidean distance over raw latitude/longitude degrees.
///
/// Not geodesic. Adequate for ranking nearby candidates within a city, which
/// is all the matcher needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Euclidean;

impl DistanceMetric for Euclidean {
    fn distance(&self, a: Location, b: Location) -> f64 {
        (a.lat - b.lat).hypot(a.lon - b.lon)
    }
}

/// Nearest-IDLE matcher.
#[derive(Debug, Default, Clone)]
pub struct Matcher<M: DistanceMetric = Euclidean> {
    metric: M,
}

impl Matcher<Euclidean> {
    #[must_use]
    pub const fn new() -> Self {
        Self { metric: Euclidean }
    }
}

impl<M: DistanceMetric> Matcher<M> {
    #[must_use]
    pub const fn with_metric(metric: M) -> Self {
        Self { metric }
    }

    /// Picks the closest IDLE candidate with a known location.
    ///
    /// Ties resolve to the first candidate in `pool` order (strict `<`).
    ///
    /// # Examples
    ///
    /// ```
    /// use kyrostream::matcher::{MatchRequest, Matcher};
    /// use kyrostream::{EntityClass, EntityKey, EntityState, EntityStatus, Location, Timestamp};
    ///
    /// let mut near = EntityState::new(EntityKey::from("101"), EntityClass::Driver, Timestamp::EPOCH);
    /// near.status = EntityStatus::Idle;
    /// near.location = Some(Location::new(47.60, -122.33));
    /// let mut far = near.clone();
    /// far.key = EntityKey::from("103");
    /// far.location = Some(Location::new(47.58, -122.30));
    ///
    /// let request = MatchRequest {
    ///     demand_id: EntityKey::from("ORD-555"),
    ///     location: Location::new(47.601, -122.331),
    /// };
    /// let result = Matcher::new().match_request(&request, &[far, near]);
    /// assert_eq!(result.matched_entity_key, Some(EntityKey::from("101")));
    /// ```
    #[must_use]
    pub fn match_request(&self, request: &MatchRequest, pool: &[EntityState]) -> MatchResult {
        let mut best: Option<(&EntityKey, f64)> = None;

        for candidate in pool {
            if candidate.status != EntityStatus::Idle {
                continue;
            }
            let Some(location) = candidate.location else {
                continue;
            };
            let d = self.metric.distance(request.location, location);
            if !d.is_finite() {
                continue;
            }
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((&candidate.key, d)),
            }
        }

        best.map_or_else(MatchResult::empty, |(key, d)| MatchResult {
            matched_entity_key: Some(key.clone()),
            distance: Some(d),
        })
    }
}
