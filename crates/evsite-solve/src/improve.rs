//! Geometric refinement of built locations.
//!
//! For every built location with at least one allocated vehicle, pool the
//! `(position, range)` pairs allocated to it across all samples and compute
//! the position minimizing aggregate drive+charge distance while keeping
//! every pooled vehicle within its own range: a constrained weighted
//! geometric median. Weiszfeld fixed-point steps are interleaved with cyclic
//! projection onto the feasibility disks.
//!
//! When the disks have no common intersection the refinement returns the
//! iterate with the smallest maximum constraint violation seen, i.e. the
//! most-nearly-feasible point encountered.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use evsite_core::constants::{STALL_DISTANCE, STALL_PERTURBATION_STD_DEV};
use evsite_core::Point;

use crate::model::Assignment;
use crate::sample::Sample;

const MAX_WEISZFELD_ITERS: usize = 200;
const MAX_PROJECTION_SWEEPS: usize = 50;
const STEP_TOL: f64 = 1e-6;
const DIST_EPS: f64 = 1e-12;
const FEAS_TOL: f64 = 1e-9;

/// A refined position for one built location.
#[derive(Debug, Clone, Copy)]
pub struct ImprovedLocation {
    /// Index of the built location this refinement replaces.
    pub old_index: usize,
    pub point: Point,
}

/// Refinement result for one solved assignment.
#[derive(Debug, Clone, Default)]
pub struct ImprovementOutcome {
    pub improved: Vec<ImprovedLocation>,
    /// Built locations with no vehicles allocated in any sample; their
    /// built/count values are zeroed downstream, never removed.
    pub empty: Vec<usize>,
}

/// Compute refined positions for every built location of `assignment`.
///
/// With `perturb_stalled`, a refinement that lands within [`STALL_DISTANCE`]
/// of the old position is perturbed by a small Normal offset so the
/// heuristic keeps proposing genuinely new candidates instead of
/// re-proposing the same point. The final reporting pass turns this off to
/// publish the actual optimum.
pub fn improve_built_locations(
    assignment: &Assignment,
    candidates: &[Point],
    samples: &[Sample],
    rng: &mut impl Rng,
    perturb_stalled: bool,
) -> ImprovementOutcome {
    let mut outcome = ImprovementOutcome::default();
    let perturbation = Normal::new(0.0, STALL_PERTURBATION_STD_DEV)
        .expect("perturbation std-dev is a positive constant");

    for k in assignment.built_indices() {
        let mut points = Vec::new();
        let mut ranges = Vec::new();
        for (s, sample) in samples.iter().enumerate() {
            for i in assignment.allocated_vehicles(s, k) {
                points.push(sample.vehicle_point(i));
                ranges.push(sample.range(i));
            }
        }

        if points.is_empty() {
            outcome.empty.push(k);
            continue;
        }

        let mut refined = constrained_geometric_median(&points, &ranges);
        let moved = refined.distance(&candidates[k]);
        if perturb_stalled && moved < STALL_DISTANCE {
            refined.x += perturbation.sample(rng);
            refined.y += perturbation.sample(rng);
            debug!(location = k, "refinement stalled; perturbing");
        }
        outcome.improved.push(ImprovedLocation {
            old_index: k,
            point: refined,
        });
    }
    debug!(
        improved = outcome.improved.len(),
        empty = outcome.empty.len(),
        "location improvement finished"
    );
    outcome
}

/// Largest amount by which `x` violates any feasibility disk.
fn max_violation(x: Point, points: &[Point], ranges: &[f64]) -> f64 {
    points
        .iter()
        .zip(ranges)
        .map(|(p, r)| x.distance(p) - r)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Weighted geometric median constrained to the intersection of the disks
/// `|x - points[i]| <= ranges[i]`.
pub fn constrained_geometric_median(points: &[Point], ranges: &[f64]) -> Point {
    debug_assert_eq!(points.len(), ranges.len());
    debug_assert!(!points.is_empty());

    // Centroid start.
    let n = points.len() as f64;
    let mut x = Point::new(
        points.iter().map(|p| p.x).sum::<f64>() / n,
        points.iter().map(|p| p.y).sum::<f64>() / n,
    );

    let mut best = x;
    let mut best_violation = max_violation(x, points, ranges);

    for _ in 0..MAX_WEISZFELD_ITERS {
        // Weiszfeld step: distance-inverse weighted average. An iterate
        // sitting on a demand point is already a minimizer of its term;
        // the epsilon floor keeps the weight finite.
        let mut wx = 0.0;
        let mut wy = 0.0;
        let mut wsum = 0.0;
        for p in points {
            let d = x.distance(p).max(DIST_EPS);
            let w = 1.0 / d;
            wx += w * p.x;
            wy += w * p.y;
            wsum += w;
        }
        let mut next = Point::new(wx / wsum, wy / wsum);

        next = project_on_disks(next, points, ranges);

        let violation = max_violation(next, points, ranges);
        if violation < best_violation {
            best_violation = violation;
            best = next;
        }

        let step = next.distance(&x);
        x = next;
        if step < STEP_TOL {
            break;
        }
    }

    if max_violation(x, points, ranges) <= FEAS_TOL {
        x
    } else {
        best
    }
}

/// Cyclic projection onto the intersection of disks. Converges to a common
/// point when one exists; otherwise leaves `x` near the least-violating
/// region, which the caller resolves via the max-violation tie-break.
fn project_on_disks(mut x: Point, points: &[Point], ranges: &[f64]) -> Point {
    for _ in 0..MAX_PROJECTION_SWEEPS {
        let mut feasible = true;
        for (p, &r) in points.iter().zip(ranges) {
            let d = x.distance(p);
            if d > r + FEAS_TOL {
                feasible = false;
                let scale = r / d;
                x = Point::new(p.x + (x.x - p.x) * scale, p.y + (x.y - p.y) * scale);
            }
        }
        if feasible {
            break;
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_of_symmetric_points_is_center() {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(2.0, 0.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 2.0),
        ];
        let ranges = vec![10.0; 4];
        let m = constrained_geometric_median(&points, &ranges);
        assert!((m.x - 1.0).abs() < 1e-4);
        assert!((m.y - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_tight_range_pulls_median_inside_disk() {
        // The unconstrained median sits between the cluster and the
        // outlier; the outlier's small range forces the result onto its
        // disk.
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(0.1, 0.0),
            Point::new(0.0, 0.1),
            Point::new(10.0, 0.0),
        ];
        let ranges = vec![100.0, 100.0, 100.0, 7.0];
        let m = constrained_geometric_median(&points, &ranges);
        assert!(m.distance(&points[3]) <= 7.0 + 1e-6);
        for (p, r) in points.iter().zip(&ranges) {
            assert!(m.distance(p) <= r + 1e-6);
        }
    }

    #[test]
    fn test_disjoint_disks_minimize_max_violation() {
        // Two vehicles 10 apart, each with range 2: no common feasible
        // region. The midpoint minimizes the maximum violation (3 on each
        // side); anything feasible is impossible.
        let points = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        let ranges = vec![2.0, 2.0];
        let m = constrained_geometric_median(&points, &ranges);
        let violation = max_violation(m, &points, &ranges);
        // Best possible max violation is 3.0 at the midpoint.
        assert!(violation <= 3.0 + 0.5, "violation {violation} too large");
    }

    #[test]
    fn test_feasible_intersection_is_respected() {
        // Disks overlap in a lens around x = 5.
        let points = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        let ranges = vec![6.0, 6.0];
        let m = constrained_geometric_median(&points, &ranges);
        assert!(m.distance(&points[0]) <= 6.0 + 1e-6);
        assert!(m.distance(&points[1]) <= 6.0 + 1e-6);
    }
}
