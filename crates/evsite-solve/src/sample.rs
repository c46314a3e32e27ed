//! Demand scenarios: one uncertainty draw per sample.
//!
//! A draw rolls, for every fleet vehicle, an independent remaining range and
//! a charging-participation indicator; the sample keeps only the
//! participating vehicles, with their positions, ranges, and the distance
//! and reachability matrices against the candidate set. Samples are
//! immutable once created except for [`Sample::extend`], which appends
//! columns for new candidates and never touches existing entries.

use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Normal};
use serde::{Deserialize, Serialize};

use evsite_core::constants;
use evsite_core::{distance_matrix, BoolMatrix, Fleet, Matrix, PlanError, PlanResult, Point};

use crate::matching;

/// Distribution parameters of one demand draw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScenarioParams {
    /// Range of a fully charged vehicle (miles).
    pub full_range: f64,
    /// Mean remaining range (miles).
    pub range_mean: f64,
    /// Std-dev of the remaining range (miles).
    pub range_std_dev: f64,
    /// Minimum remaining range (miles).
    pub range_floor: f64,
    /// Probability a vehicle participates (seeks a charge).
    pub charging_probability: f64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            full_range: constants::FULL_RANGE,
            range_mean: constants::RANGE_MEAN,
            range_std_dev: constants::RANGE_STD_DEV,
            range_floor: constants::RANGE_FLOOR,
            charging_probability: constants::CHARGING_PROBABILITY,
        }
    }
}

/// One demand realization: the charging vehicles of a single day.
#[derive(Debug, Clone)]
pub struct Sample {
    vehicle_points: Vec<Point>,
    ranges: Vec<f64>,
    full_range: f64,
    distances: Matrix,
    reachable: BoolMatrix,
}

impl Sample {
    /// Draw a fresh sample for the fleet against `candidates`.
    ///
    /// Ranges follow a clamped normal; each vehicle participates with the
    /// configured probability and non-participants are dropped from the
    /// sample entirely.
    pub fn draw(
        fleet: &Fleet,
        candidates: &[Point],
        params: &ScenarioParams,
        rng: &mut impl Rng,
    ) -> PlanResult<Self> {
        let range_dist = Normal::new(params.range_mean, params.range_std_dev)
            .map_err(|e| PlanError::Config(format!("range distribution: {e}")))?;
        let participation = Bernoulli::new(params.charging_probability)
            .map_err(|e| PlanError::Config(format!("charging probability: {e}")))?;

        let mut vehicle_points = Vec::new();
        let mut ranges = Vec::new();
        for &p in fleet.points() {
            let range: f64 = range_dist.sample(rng);
            let charging = participation.sample(rng);
            if charging {
                vehicle_points.push(p);
                ranges.push(range.clamp(params.range_floor, params.full_range));
            }
        }

        let n = vehicle_points.len();
        let mut sample = Self {
            vehicle_points,
            ranges,
            full_range: params.full_range,
            distances: Matrix::new(n),
            reachable: BoolMatrix::new(n),
        };
        sample.extend(candidates);
        Ok(sample)
    }

    /// Append distance/reachability columns for new candidates.
    ///
    /// Existing columns are never recomputed; the matrices only grow.
    pub fn extend(&mut self, new_candidates: &[Point]) {
        let new_distances = distance_matrix(&self.vehicle_points, new_candidates);
        for j in 0..new_distances.cols() {
            let column = new_distances.col(j);
            let reach: Vec<bool> = column
                .iter()
                .zip(&self.ranges)
                .map(|(d, r)| d <= r)
                .collect();
            self.distances.push_col(column);
            self.reachable.push_col(&reach);
        }
    }

    /// Charging vehicles in this draw.
    pub fn n_vehicles(&self) -> usize {
        self.vehicle_points.len()
    }

    pub fn n_candidates(&self) -> usize {
        self.distances.cols()
    }

    pub fn vehicle_point(&self, i: usize) -> Point {
        self.vehicle_points[i]
    }

    pub fn range(&self, i: usize) -> f64 {
        self.ranges[i]
    }

    pub fn distance(&self, i: usize, k: usize) -> f64 {
        self.distances.get(i, k)
    }

    pub fn reachable(&self, i: usize, k: usize) -> bool {
        self.reachable.get(i, k)
    }

    /// Cost of topping every charging vehicle up from its drawn range to
    /// full, independent of where it charges.
    pub fn fixed_charge_cost(&self, charge_cost: f64) -> f64 {
        charge_cost
            * self
                .ranges
                .iter()
                .map(|r| self.full_range - r)
                .sum::<f64>()
    }

    /// Best attainable served fraction with `capacities[k]` vehicles per
    /// location.
    pub fn max_service_level(&self, capacities: &[u32]) -> f64 {
        matching::max_service_fraction(self.n_vehicles(), capacities, |i, k| {
            self.reachable(i, k)
        })
    }
}
