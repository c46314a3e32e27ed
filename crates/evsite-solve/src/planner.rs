//! The iterative location-improvement heuristic.
//!
//! Control flow: seed candidates -> draw samples -> build the MILP -> loop {
//! solve -> extract -> geometric refinement -> proximity filter -> extend
//! model (columns, variables, constraints, objective) -> warm start ->
//! stability check } -> finalize. Candidates only ever accumulate; the model
//! is never rebuilt, which is what makes the warm starts valid across
//! iterations.

use std::ops::Range;
use std::time::Duration;

use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use evsite_core::constants::STABILITY_EPSILON;
use evsite_core::{CostParams, Fleet, PlanError, PlanResult, Point, StationParams};

use crate::convergence::{ConvergenceMonitor, ConvergenceState};
use crate::filter::{filter_locations, FilterParams};
use crate::improve::improve_built_locations;
use crate::milp::{MilpBackend, SolveOptions, SolveStatus};
use crate::model::{Assignment, ProblemModel, KPI_TOTAL};
use crate::sample::ScenarioParams;
use crate::warmstart::build_warm_start;

/// How the initial candidate set is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedMode {
    /// Uniform draw over the fleet's bounding box.
    UniformRandom,
    /// Lloyd k-means cluster centers of the fleet.
    KMeans,
}

/// Outer-loop configuration.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Number of demand samples the model optimizes over.
    pub samples: usize,
    /// Stability tolerance on the total-cost delta.
    pub epsilon_stable: f64,
    /// Wall-clock budget per solve call (not per run).
    pub time_limit: Option<Duration>,
    /// Optional solution limit per solve call.
    pub solution_limit: Option<u32>,
    /// Hard cap on outer iterations.
    pub max_iterations: usize,
    /// Proximity-filter tuning.
    pub filter: FilterParams,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            samples: 5,
            epsilon_stable: STABILITY_EPSILON,
            time_limit: Some(Duration::from_secs(10)),
            solution_limit: None,
            max_iterations: 50,
            filter: FilterParams::default(),
        }
    }
}

/// Immutable view of one finished outer iteration.
#[derive(Debug)]
pub struct IterationSnapshot<'a> {
    pub iteration: usize,
    pub assignment: &'a Assignment,
    pub candidates: &'a [Point],
}

/// Per-iteration observer; absent observers cost nothing.
pub trait ProgressObserver {
    fn on_iteration(&mut self, snapshot: &IterationSnapshot<'_>);
}

/// Final result of a planning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutcome {
    /// Refined coordinates of every built location.
    pub built_locations: Vec<Point>,
    /// Chargers installed per built location, aligned with
    /// `built_locations`.
    pub charger_counts: Vec<u32>,
    /// Solved objective per outer iteration.
    pub objective_history: Vec<f64>,
    /// Candidate locations added per iteration (seeding included).
    pub added_history: Vec<Vec<Point>>,
    pub iterations: usize,
    /// Final MILP optimality gap.
    pub gap_abs: f64,
    pub gap_rel: f64,
    pub converged: ConvergenceState,
    pub final_assignment: Assignment,
}

/// Orchestrates the improvement heuristic over a [`ProblemModel`].
pub struct LocationPlanner {
    model: ProblemModel,
    observer: Option<Box<dyn ProgressObserver>>,
    added_history: Vec<Vec<Point>>,
}

impl LocationPlanner {
    pub fn new(
        fleet: Fleet,
        costs: CostParams,
        station: StationParams,
        scenario: ScenarioParams,
        backend: Box<dyn MilpBackend>,
    ) -> Self {
        Self {
            model: ProblemModel::new(fleet, costs, station, scenario, backend),
            observer: None,
            added_history: Vec::new(),
        }
    }

    pub fn model(&self) -> &ProblemModel {
        &self.model
    }

    pub fn set_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observer = Some(observer);
    }

    /// Seed initial candidate locations.
    pub fn seed_locations(
        &mut self,
        n_stations: usize,
        mode: SeedMode,
        rng: &mut impl Rng,
    ) -> PlanResult<Range<usize>> {
        let coords = match mode {
            SeedMode::UniformRandom => uniform_locations(self.model.fleet(), n_stations, rng),
            SeedMode::KMeans => kmeans_centers(self.model.fleet(), n_stations, rng)?,
        };
        info!(count = coords.len(), ?mode, "seeding candidate locations");
        self.added_history.push(coords.clone());
        Ok(self.model.add_locations(&coords))
    }

    /// Seed explicit candidate coordinates (for callers with domain
    /// knowledge about good sites).
    pub fn seed_locations_at(&mut self, coords: &[Point]) -> Range<usize> {
        self.added_history.push(coords.to_vec());
        self.model.add_locations(coords)
    }

    /// Run the full heuristic.
    pub fn solve(&mut self, config: &PlannerConfig, rng: &mut impl Rng) -> PlanResult<PlanOutcome> {
        if self.model.n_candidates() == 0 {
            return Err(PlanError::Validation(
                "seed candidate locations before solving".into(),
            ));
        }
        if let Some(fixed) = self.model.station().fixed_station_count {
            if fixed > self.model.n_candidates() {
                return Err(PlanError::Validation(format!(
                    "fixed station count {fixed} exceeds the {} available candidates",
                    self.model.n_candidates()
                )));
            }
        }
        if config.samples == 0 {
            return Err(PlanError::Validation(
                "at least one demand sample is required".into(),
            ));
        }
        self.model.add_samples(config.samples, rng)?;

        // Cheap matching-based feasibility check before any MILP work.
        let target = self.model.station().service_level;
        let attainable = self
            .model
            .max_service_levels()
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        debug!(attainable, target, "feasibility pre-check");
        if attainable < target {
            return Err(PlanError::infeasible(format!(
                "attainable service level {attainable:.3} is below the target {target:.3}"
            )));
        }

        let initial = 0..self.model.n_candidates();
        self.model.extend_constraints(initial.clone());
        self.model.extend_objective(initial);

        let options = SolveOptions {
            time_limit: config.time_limit,
            solution_limit: config.solution_limit,
        };
        let mut monitor = ConvergenceMonitor::new(config.epsilon_stable);
        let mut objective_history = Vec::new();
        let mut iterations = 0;

        let final_assignment = loop {
            iterations += 1;
            let assignment = self.solve_to_limit(options)?;
            objective_history.push(assignment.objective);
            info!(
                iteration = iterations,
                objective = assignment.objective,
                built = assignment.n_built(),
                "iteration solved"
            );
            if let Some(observer) = self.observer.as_deref_mut() {
                observer.on_iteration(&IterationSnapshot {
                    iteration: iterations,
                    assignment: &assignment,
                    candidates: self.model.candidate_points(),
                });
            }

            let improvement = improve_built_locations(
                &assignment,
                self.model.candidate_points(),
                self.model.samples(),
                rng,
                true,
            );
            let accepted = filter_locations(
                &improvement.improved,
                self.model.candidate_points(),
                self.model.fleet(),
                &config.filter,
                rng,
            );
            if accepted.is_empty() {
                monitor.observe(assignment.total_cost(), assignment.total_cost(), 0);
                break assignment;
            }

            let new_points: Vec<Point> = accepted.iter().map(|a| a.point).collect();
            self.added_history.push(new_points.clone());
            let new_range = self.model.add_locations(&new_points);
            self.model.extend_constraints(new_range.clone());
            self.model.extend_objective(new_range.clone());

            let replacements: Vec<(usize, usize)> = accepted
                .iter()
                .zip(new_range)
                .map(|(a, new)| (a.old_index, new))
                .collect();
            let warm = build_warm_start(&self.model, &assignment, &replacements, &improvement.empty);
            let warm_total = self.model.warm_start_kpi(KPI_TOTAL, &warm)?;
            self.model.push_warm_start(warm);

            let state = monitor.observe(assignment.total_cost(), warm_total, accepted.len());
            if state.is_stable() {
                break assignment;
            }
            if iterations >= config.max_iterations {
                warn!(iterations, "outer iteration cap reached");
                break assignment;
            }
        };

        // Final pass: refine the built positions once more, without the
        // proximity filter and without stall perturbation, so the reported
        // coordinates are the best for the final allocation.
        let final_refinement = improve_built_locations(
            &final_assignment,
            self.model.candidate_points(),
            self.model.samples(),
            rng,
            false,
        );
        let mut built_locations = Vec::new();
        let mut charger_counts = Vec::new();
        for k in final_assignment.built_indices() {
            let point = final_refinement
                .improved
                .iter()
                .find(|loc| loc.old_index == k)
                .map(|loc| loc.point)
                .unwrap_or(self.model.candidate_points()[k]);
            built_locations.push(point);
            charger_counts.push(final_assignment.count[k]);
        }

        info!(
            iterations,
            built = built_locations.len(),
            chargers = final_assignment.total_chargers(),
            objective = final_assignment.objective,
            "optimization finished"
        );
        Ok(PlanOutcome {
            built_locations,
            charger_counts,
            objective_history,
            added_history: std::mem::take(&mut self.added_history),
            iterations,
            gap_abs: final_assignment.gap_abs,
            gap_rel: final_assignment.gap_rel,
            converged: monitor.state(),
            final_assignment,
        })
    }

    /// Solve until the backend reports something other than a solution
    /// limit, carrying the incumbent forward as a warm start in between.
    fn solve_to_limit(&mut self, options: SolveOptions) -> PlanResult<Assignment> {
        loop {
            let assignment = self.model.solve(options)?;
            match assignment.status {
                SolveStatus::SolutionLimit => {
                    debug!(
                        objective = assignment.objective,
                        "solution limit hit; continuing from incumbent"
                    );
                    let start = self.model.assignment_to_partial(&assignment, "incumbent");
                    self.model.push_warm_start(start);
                }
                _ => break Ok(assignment),
            }
        }
    }
}

/// Uniform random locations over the fleet's bounding box.
fn uniform_locations(fleet: &Fleet, n: usize, rng: &mut impl Rng) -> Vec<Point> {
    let (min, max) = fleet.bounding_box();
    (0..n)
        .map(|_| {
            Point::new(
                min.x + rng.gen::<f64>() * (max.x - min.x),
                min.y + rng.gen::<f64>() * (max.y - min.y),
            )
        })
        .collect()
}

/// Lloyd k-means cluster centers of the fleet positions.
fn kmeans_centers(fleet: &Fleet, k: usize, rng: &mut impl Rng) -> PlanResult<Vec<Point>> {
    if k == 0 || k > fleet.len() {
        return Err(PlanError::Validation(format!(
            "cannot seed {k} cluster centers from {} vehicles",
            fleet.len()
        )));
    }
    let points = fleet.points();
    let mut centers: Vec<Point> = sample(rng, points.len(), k)
        .into_iter()
        .map(|i| points[i])
        .collect();

    let mut assignment = vec![0usize; points.len()];
    for _ in 0..20 {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    p.distance(a)
                        .partial_cmp(&p.distance(b))
                        .expect("distances are finite")
                })
                .map(|(c, _)| c)
                .unwrap_or(0);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<&Point> = points
                .iter()
                .zip(&assignment)
                .filter_map(|(p, &a)| (a == c).then_some(p))
                .collect();
            if !members.is_empty() {
                let m = members.len() as f64;
                *center = Point::new(
                    members.iter().map(|p| p.x).sum::<f64>() / m,
                    members.iter().map(|p| p.y).sum::<f64>() / m,
                );
            }
        }
        if !changed {
            break;
        }
    }
    Ok(centers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fleet() -> Fleet {
        Fleet::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(11.0, 10.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_uniform_seeding_stays_in_bounding_box() {
        let fleet = fleet();
        let mut rng = StdRng::seed_from_u64(5);
        for p in uniform_locations(&fleet, 32, &mut rng) {
            assert!(p.x >= 0.0 && p.x <= 11.0);
            assert!(p.y >= 0.0 && p.y <= 10.0);
        }
    }

    #[test]
    fn test_kmeans_finds_the_two_clusters() {
        let fleet = fleet();
        let mut rng = StdRng::seed_from_u64(6);
        let centers = kmeans_centers(&fleet, 2, &mut rng).unwrap();
        assert_eq!(centers.len(), 2);
        let mut xs: Vec<f64> = centers.iter().map(|c| c.x).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((xs[0] - 0.5).abs() < 1e-6);
        assert!((xs[1] - 10.5).abs() < 1e-6);
    }

    #[test]
    fn test_kmeans_rejects_more_centers_than_vehicles() {
        let fleet = fleet();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(kmeans_centers(&fleet, 9, &mut rng).is_err());
    }
}
