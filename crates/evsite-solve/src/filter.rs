//! Proximity filter for proposed candidate locations.
//!
//! Refined positions far from every existing candidate are accepted
//! unconditionally. Positions close to an existing candidate are accepted
//! with probability `expected served demand / existing capacity` inside the
//! counting radius, which keeps dense clusters from accreting duplicates
//! while still letting relocations reach under-served areas.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use evsite_core::constants::{
    CHARGING_PROBABILITY, DEFAULT_COUNTING_RADIUS, DEFAULT_MIN_DISTANCE, STATION_CAPACITY,
};
use evsite_core::{Fleet, Point};

use crate::improve::ImprovedLocation;

/// Tuning knobs of the proximity filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterParams {
    /// Proposals farther than this from every existing candidate bypass the
    /// probabilistic check (miles).
    pub min_distance: f64,
    /// Radius of the local demand/capacity estimate (miles).
    pub counting_radius: f64,
    /// Expected charging-participation rate of nearby vehicles.
    pub charging_probability: f64,
    /// Charger capacity assumed per existing candidate.
    pub station_capacity: u32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_distance: DEFAULT_MIN_DISTANCE,
            counting_radius: DEFAULT_COUNTING_RADIUS,
            charging_probability: CHARGING_PROBABILITY,
            station_capacity: STATION_CAPACITY,
        }
    }
}

/// Accept or reject each proposed location, one rng draw per proposal.
pub fn filter_locations(
    proposed: &[ImprovedLocation],
    existing: &[Point],
    fleet: &Fleet,
    params: &FilterParams,
    rng: &mut impl Rng,
) -> Vec<ImprovedLocation> {
    let mut accepted = Vec::with_capacity(proposed.len());
    for candidate in proposed {
        let closest = existing
            .iter()
            .map(|p| candidate.point.distance(p))
            .fold(f64::INFINITY, f64::min);
        if closest > params.min_distance {
            accepted.push(*candidate);
            continue;
        }

        let probability = acceptance_probability(candidate.point, existing, fleet, params);
        let draw: f64 = rng.gen();
        debug!(
            old_index = candidate.old_index,
            probability, "proposal near an existing candidate"
        );
        if draw < probability {
            accepted.push(*candidate);
        }
    }
    debug!(
        proposed = proposed.len(),
        accepted = accepted.len(),
        "proximity filter finished"
    );
    accepted
}

/// `expected served / existing capacity` inside the counting radius;
/// probability 1 when no existing candidate is inside the radius.
fn acceptance_probability(
    point: Point,
    existing: &[Point],
    fleet: &Fleet,
    params: &FilterParams,
) -> f64 {
    let vehicles_in_radius = fleet
        .points()
        .iter()
        .filter(|p| point.distance(p) < params.counting_radius)
        .count();
    let expected_served = vehicles_in_radius as f64 * params.charging_probability;

    let candidates_in_radius = existing
        .iter()
        .filter(|p| point.distance(p) < params.counting_radius)
        .count();
    let capacity_in_radius =
        candidates_in_radius as f64 * 2.0 * params.station_capacity as f64;

    if capacity_in_radius == 0.0 {
        1.0
    } else {
        expected_served / capacity_in_radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fleet() -> Fleet {
        Fleet::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).unwrap()
    }

    fn proposal(x: f64, y: f64) -> ImprovedLocation {
        ImprovedLocation {
            old_index: 0,
            point: Point::new(x, y),
        }
    }

    #[test]
    fn test_distant_proposal_accepted_unconditionally() {
        let existing = vec![Point::new(100.0, 100.0)];
        let params = FilterParams::default();
        let mut rng = StdRng::seed_from_u64(0);
        let accepted =
            filter_locations(&[proposal(0.0, 0.0)], &existing, &fleet(), &params, &mut rng);
        assert_eq!(accepted.len(), 1);
    }

    #[test]
    fn test_empty_counting_radius_gives_probability_one() {
        // Existing candidate within min_distance but outside the counting
        // radius: the probabilistic branch fires with denominator zero.
        let existing = vec![Point::new(0.5, 0.0)];
        let params = FilterParams {
            min_distance: 1.0,
            counting_radius: 0.2,
            ..FilterParams::default()
        };
        assert_eq!(
            acceptance_probability(Point::new(0.0, 0.0), &existing, &fleet(), &params),
            1.0
        );
        // And therefore every draw accepts.
        let mut rng = StdRng::seed_from_u64(1);
        let accepted =
            filter_locations(&[proposal(0.0, 0.0)], &existing, &fleet(), &params, &mut rng);
        assert_eq!(accepted.len(), 1);
    }

    #[test]
    fn test_saturated_area_rejects_eventually() {
        // 20 existing candidates on top of two vehicles: acceptance
        // probability 2*0.5 / (20*2*8) = 1/320, so 200 seeded draws should
        // reject at least once (and nearly always).
        let existing: Vec<Point> = (0..20).map(|i| Point::new(0.01 * i as f64, 0.0)).collect();
        let params = FilterParams::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut rejections = 0;
        for _ in 0..200 {
            let accepted =
                filter_locations(&[proposal(0.0, 0.0)], &existing, &fleet(), &params, &mut rng);
            if accepted.is_empty() {
                rejections += 1;
            }
        }
        assert!(rejections > 150);
    }
}
