//! The incremental placement MILP.
//!
//! [`ProblemModel`] owns the growing model state: a candidate arena with
//! stable indices and variable handles, the demand samples, and the
//! [`ModelBuilder`] store handed to the solving backend. Candidates,
//! variables and constraints are strictly additive across outer iterations
//! so prior solutions stay mappable onto the enlarged variable space.
//!
//! Decision variables per candidate `k`:
//! - `built_k` in {0,1} - the location is constructed
//! - `count_k` in {0..capacity} - chargers installed there
//! - `alloc_s_i_k` in {0,1} - vehicle `i` of sample `s` charges at `k`,
//!   materialized only where the pair is reachable; unreachable pairs are a
//!   structural zero, not a variable.

use std::collections::HashMap;
use std::ops::Range;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use evsite_core::constants::ANNUALIZATION_DAYS;
use evsite_core::{CostParams, Fleet, PlanError, PlanResult, Point, StationParams};

use crate::milp::{
    LinExpr, MilpBackend, ModelBuilder, PartialAssignment, Sense, SolveOptions, SolveOutcome,
    SolveStatus, VarId,
};
use crate::sample::{Sample, ScenarioParams};

/// KPI names registered on the model.
pub const KPI_TOTAL: &str = "total_cost";
pub const KPI_BUILD: &str = "build_cost";
pub const KPI_MAINTENANCE: &str = "maintenance_cost";
pub const KPI_DRIVE_CHARGE: &str = "drive_charge_cost";
pub const KPI_FIXED_CHARGE: &str = "fixed_charge_cost";

/// Variable handles of one candidate location.
#[derive(Debug, Clone, Copy)]
struct CandidateVars {
    built: VarId,
    count: VarId,
}

/// Sparse allocation cells of one sample; `cells[i][k]` is present only when
/// vehicle `i` can reach candidate `k` in that draw.
#[derive(Debug, Default)]
struct AllocVars {
    cells: Vec<Vec<Option<VarId>>>,
}

/// Immutable snapshot of one solved assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub built: Vec<bool>,
    pub count: Vec<u32>,
    /// Per sample, the `(vehicle, location)` pairs with allocation 1.
    pub alloc: Vec<Vec<(usize, usize)>>,
    pub objective: f64,
    pub kpis: HashMap<String, f64>,
    pub status: SolveStatus,
    pub gap_abs: f64,
    pub gap_rel: f64,
}

impl Assignment {
    pub fn built_indices(&self) -> Vec<usize> {
        self.built
            .iter()
            .enumerate()
            .filter_map(|(k, &b)| b.then_some(k))
            .collect()
    }

    pub fn n_built(&self) -> usize {
        self.built.iter().filter(|&&b| b).count()
    }

    pub fn total_chargers(&self) -> u32 {
        self.count.iter().sum()
    }

    /// Vehicles of sample `s` allocated to location `k`.
    pub fn allocated_vehicles(&self, s: usize, k: usize) -> Vec<usize> {
        self.alloc[s]
            .iter()
            .filter_map(|&(i, loc)| (loc == k).then_some(i))
            .collect()
    }

    pub fn total_cost(&self) -> f64 {
        self.kpis.get(KPI_TOTAL).copied().unwrap_or(self.objective)
    }
}

/// The growing placement MILP and its solving backend.
pub struct ProblemModel {
    fleet: Fleet,
    costs: CostParams,
    station: StationParams,
    scenario: ScenarioParams,
    builder: ModelBuilder,
    backend: Box<dyn MilpBackend>,

    candidates: Vec<Point>,
    candidate_vars: Vec<CandidateVars>,
    samples: Vec<Sample>,
    alloc_vars: Vec<AllocVars>,

    // Objective constituents; extended per candidate batch, never rebuilt.
    build_cost: LinExpr,
    maintenance_cost: LinExpr,
    drive_charge_cost: LinExpr,
    fixed_charge_cost: f64,

    pending_warm_start: Option<PartialAssignment>,
}

impl ProblemModel {
    pub fn new(
        fleet: Fleet,
        costs: CostParams,
        station: StationParams,
        scenario: ScenarioParams,
        backend: Box<dyn MilpBackend>,
    ) -> Self {
        Self {
            fleet,
            costs,
            station,
            scenario,
            builder: ModelBuilder::new(),
            backend,
            candidates: Vec::new(),
            candidate_vars: Vec::new(),
            samples: Vec::new(),
            alloc_vars: Vec::new(),
            build_cost: LinExpr::new(),
            maintenance_cost: LinExpr::new(),
            drive_charge_cost: LinExpr::new(),
            fixed_charge_cost: 0.0,
            pending_warm_start: None,
        }
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn costs(&self) -> &CostParams {
        &self.costs
    }

    pub fn station(&self) -> &StationParams {
        &self.station
    }

    pub fn n_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn candidate_points(&self) -> &[Point] {
        &self.candidates
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn built_var(&self, k: usize) -> VarId {
        self.candidate_vars[k].built
    }

    pub fn count_var(&self, k: usize) -> VarId {
        self.candidate_vars[k].count
    }

    /// Allocation variable of `(sample, vehicle, location)`, absent when the
    /// pair is unreachable in that draw.
    pub fn alloc_var(&self, s: usize, i: usize, k: usize) -> Option<VarId> {
        self.alloc_vars[s].cells[i][k]
    }

    /// Register new candidate locations: stable indices, `built`/`count`
    /// variables, sample matrix columns and (reachable-only) allocation
    /// variables. Indices are never reused or removed.
    pub fn add_locations(&mut self, coords: &[Point]) -> Range<usize> {
        let start = self.candidates.len();
        for sample in &mut self.samples {
            sample.extend(coords);
        }
        for point in coords {
            let k = self.candidates.len();
            let built = self.builder.add_binary(format!("built_{k}"));
            let count = self
                .builder
                .add_integer(format!("count_{k}"), self.station.capacity);
            self.candidates.push(*point);
            self.candidate_vars.push(CandidateVars { built, count });

            for s in 0..self.samples.len() {
                for i in 0..self.samples[s].n_vehicles() {
                    let cell = if self.samples[s].reachable(i, k) {
                        Some(self.builder.add_binary(format!("alloc_{s}_{i}_{k}")))
                    } else {
                        None
                    };
                    self.alloc_vars[s].cells[i].push(cell);
                }
            }
        }
        debug!(
            added = coords.len(),
            total = self.candidates.len(),
            "candidate locations added"
        );
        start..self.candidates.len()
    }

    /// Draw `num` fresh demand samples against the current candidate set.
    pub fn add_samples(&mut self, num: usize, rng: &mut impl Rng) -> PlanResult<()> {
        for _ in 0..num {
            let s = self.samples.len();
            let sample = Sample::draw(&self.fleet, &self.candidates, &self.scenario, rng)?;
            self.fixed_charge_cost += sample.fixed_charge_cost(self.costs.charge_cost);

            let n_cand = self.candidates.len();
            let mut cells = Vec::with_capacity(sample.n_vehicles());
            for i in 0..sample.n_vehicles() {
                let mut row = Vec::with_capacity(n_cand);
                for k in 0..n_cand {
                    let cell = if sample.reachable(i, k) {
                        Some(self.builder.add_binary(format!("alloc_{s}_{i}_{k}")))
                    } else {
                        None
                    };
                    row.push(cell);
                }
                cells.push(row);
            }
            self.samples.push(sample);
            self.alloc_vars.push(AllocVars { cells });
        }
        info!(
            added = num,
            total = self.samples.len(),
            "demand samples added"
        );
        Ok(())
    }

    /// Append per-location constraints for the new candidates and extend the
    /// aggregate constraints in place.
    ///
    /// Aggregate constraints (fixed station count, per-sample service level,
    /// per-vehicle at-most-one) range over the old and new candidate sets
    /// jointly, so the existing constraint is fetched by name and its
    /// left-hand sum extended rather than re-created.
    pub fn extend_constraints(&mut self, locations: Range<usize>) {
        if let Some(n) = self.station.fixed_station_count {
            let sum_new = LinExpr::sum(
                locations
                    .clone()
                    .map(|k| self.candidate_vars[k].built),
            );
            match self.builder.constraint_by_name("fixed_station_count") {
                Some(id) => self.builder.extend_constraint(id, &sum_new),
                None => {
                    self.builder
                        .add_constraint("fixed_station_count", sum_new, Sense::Eq, n as f64);
                }
            }
        }

        let capacity = self.station.capacity as f64;
        let queue = self.station.queue_size as f64;
        for k in locations.clone() {
            let CandidateVars { built, count } = self.candidate_vars[k];
            self.builder.add_constraint(
                format!("count_le_cap_{k}"),
                LinExpr::new()
                    .with_term(count, 1.0)
                    .with_term(built, -capacity),
                Sense::Le,
                0.0,
            );
            self.builder.add_constraint(
                format!("built_le_count_{k}"),
                LinExpr::new().with_term(built, 1.0).with_term(count, -1.0),
                Sense::Le,
                0.0,
            );
        }

        for s in 0..self.samples.len() {
            let n_vehicles = self.samples[s].n_vehicles();

            for k in locations.clone() {
                let mut expr = LinExpr::new();
                for i in 0..n_vehicles {
                    if let Some(u) = self.alloc_vars[s].cells[i][k] {
                        expr.add_term(u, 1.0);
                    }
                }
                expr.add_term(self.candidate_vars[k].count, -queue);
                self.builder
                    .add_constraint(format!("queue_{s}_{k}"), expr, Sense::Le, 0.0);
            }

            let mut service_new = LinExpr::new();
            for i in 0..n_vehicles {
                for k in locations.clone() {
                    if let Some(u) = self.alloc_vars[s].cells[i][k] {
                        service_new.add_term(u, 1.0);
                    }
                }
            }
            let service_name = format!("service_{s}");
            match self.builder.constraint_by_name(&service_name) {
                Some(id) => self.builder.extend_constraint(id, &service_new),
                None => {
                    let rhs = self.station.service_level * n_vehicles as f64;
                    self.builder
                        .add_constraint(service_name, service_new, Sense::Ge, rhs);
                }
            }

            for i in 0..n_vehicles {
                let mut once_new = LinExpr::new();
                for k in locations.clone() {
                    if let Some(u) = self.alloc_vars[s].cells[i][k] {
                        once_new.add_term(u, 1.0);
                    }
                }
                let once_name = format!("alloc_once_{s}_{i}");
                match self.builder.constraint_by_name(&once_name) {
                    Some(id) => self.builder.extend_constraint(id, &once_new),
                    None => {
                        self.builder
                            .add_constraint(once_name, once_new, Sense::Le, 1.0);
                    }
                }
            }
        }
        debug!("constraints extended");
    }

    /// Accumulate the objective constituents over the new candidates and
    /// refresh objective and KPIs. The fixed top-up charge term is
    /// candidate-independent and was added when the samples were drawn.
    pub fn extend_objective(&mut self, locations: Range<usize>) {
        let drive_charge = self.costs.drive_charge_cost();
        for k in locations.clone() {
            let CandidateVars { built, count } = self.candidate_vars[k];
            self.build_cost.add_term(built, self.costs.build_cost);
            self.maintenance_cost
                .add_term(count, self.costs.maintenance_cost);
        }
        for s in 0..self.samples.len() {
            for i in 0..self.samples[s].n_vehicles() {
                for k in locations.clone() {
                    if let Some(u) = self.alloc_vars[s].cells[i][k] {
                        self.drive_charge_cost
                            .add_term(u, drive_charge * self.samples[s].distance(i, k));
                    }
                }
            }
        }
        self.apply_objective();
    }

    fn apply_objective(&mut self) {
        let annual = ANNUALIZATION_DAYS / self.samples.len().max(1) as f64;
        let mut total = LinExpr::new();
        total.extend(&self.build_cost);
        total.extend(&self.maintenance_cost);
        total.extend(&self.drive_charge_cost.scaled(annual));
        total.add_constant(annual * self.fixed_charge_cost);

        self.builder.set_objective(total.clone());
        self.builder.set_kpi(KPI_TOTAL, total);
        self.builder.set_kpi(KPI_BUILD, self.build_cost.clone());
        self.builder
            .set_kpi(KPI_MAINTENANCE, self.maintenance_cost.clone());
        self.builder
            .set_kpi(KPI_DRIVE_CHARGE, self.drive_charge_cost.scaled(annual));
        self.builder.set_kpi(
            KPI_FIXED_CHARGE,
            LinExpr::constant(annual * self.fixed_charge_cost),
        );
        debug!("objective and KPIs refreshed");
    }

    /// Best attainable service level of each sample, using the full
    /// per-location throughput bound (`queue_size * capacity` vehicles).
    pub fn max_service_levels(&self) -> Vec<f64> {
        let per_location = self.station.queue_size * self.station.capacity;
        let capacities = vec![per_location; self.candidates.len()];
        self.samples
            .iter()
            .map(|s| s.max_service_level(&capacities))
            .collect()
    }

    /// Solve the current model. Limit statuses are recoverable and return
    /// the incumbent; infeasibility is terminal.
    pub fn solve(&mut self, options: SolveOptions) -> PlanResult<Assignment> {
        let warm_start = self.pending_warm_start.take();
        let outcome = self
            .backend
            .solve(&self.builder, options, warm_start.as_ref())?;
        if outcome.status == SolveStatus::Infeasible {
            return Err(PlanError::infeasible(
                "the placement model has no feasible assignment for the current candidate set",
            ));
        }
        Ok(self.extract(outcome))
    }

    /// Queue a warm start for the next solve.
    pub fn push_warm_start(&mut self, start: PartialAssignment) {
        debug!(name = start.name(), entries = start.len(), "warm start queued");
        self.pending_warm_start = Some(start);
    }

    /// Evaluate a KPI under a partial assignment (zeros completed).
    pub fn warm_start_kpi(&self, name: &str, start: &PartialAssignment) -> PlanResult<f64> {
        self.builder
            .kpi_value(name, &start.dense(self.builder.num_vars()))
    }

    /// Express a solved assignment as a sparse partial assignment.
    pub fn assignment_to_partial(&self, assignment: &Assignment, name: &str) -> PartialAssignment {
        let mut start = PartialAssignment::new(name);
        for (k, vars) in self.candidate_vars.iter().enumerate() {
            if assignment.built[k] {
                start.set(vars.built, 1.0);
                start.set(vars.count, assignment.count[k] as f64);
            }
        }
        for (s, pairs) in assignment.alloc.iter().enumerate() {
            for &(i, k) in pairs {
                if let Some(u) = self.alloc_vars[s].cells[i][k] {
                    start.set(u, 1.0);
                }
            }
        }
        start
    }

    /// Round solver output to a hard integer assignment.
    ///
    /// Fractional values within tolerance of 0/1 (or an integer count) come
    /// back from MILP engines routinely; they are rounded here and never
    /// propagated further.
    fn extract(&self, outcome: SolveOutcome) -> Assignment {
        let values = &outcome.values;
        let built: Vec<bool> = self
            .candidate_vars
            .iter()
            .map(|cv| values[cv.built.index()].round() > 0.5)
            .collect();
        let count: Vec<u32> = self
            .candidate_vars
            .iter()
            .map(|cv| values[cv.count.index()].round().max(0.0) as u32)
            .collect();
        let mut alloc = Vec::with_capacity(self.samples.len());
        for vars in &self.alloc_vars {
            let mut pairs = Vec::new();
            for (i, row) in vars.cells.iter().enumerate() {
                for (k, cell) in row.iter().enumerate() {
                    if let Some(u) = cell {
                        if values[u.index()].round() > 0.5 {
                            pairs.push((i, k));
                        }
                    }
                }
            }
            alloc.push(pairs);
        }
        info!(
            status = %outcome.status,
            objective = outcome.objective,
            built = built.iter().filter(|&&b| b).count(),
            "solution extracted"
        );
        Assignment {
            built,
            count,
            alloc,
            objective: outcome.objective,
            kpis: self.builder.kpi_values(values),
            status: outcome.status,
            gap_abs: outcome.gap_abs,
            gap_rel: outcome.gap_rel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milp::BranchBoundBackend;
    use evsite_core::Point;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_model(service_level: f64) -> ProblemModel {
        let fleet = Fleet::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
        ])
        .unwrap();
        let station = StationParams::with_service_level(service_level).unwrap();
        // Everyone charges, with ranges generous enough to reach any
        // nearby candidate.
        let scenario = ScenarioParams {
            range_mean: 100.0,
            range_std_dev: 0.0,
            charging_probability: 1.0,
            ..ScenarioParams::default()
        };
        ProblemModel::new(
            fleet,
            CostParams::default(),
            station,
            scenario,
            Box::new(BranchBoundBackend::default()),
        )
    }

    #[test]
    fn test_alloc_vars_only_for_reachable_pairs() {
        let mut model = tiny_model(1.0);
        model.add_locations(&[Point::new(0.5, 0.5), Point::new(500.0, 500.0)]);
        let mut rng = StdRng::seed_from_u64(1);
        model.add_samples(1, &mut rng).unwrap();

        for i in 0..4 {
            assert!(model.alloc_var(0, i, 0).is_some());
            // The far-away candidate is out of range for everyone: a
            // structural zero, not a variable.
            assert!(model.alloc_var(0, i, 1).is_none());
        }
    }

    #[test]
    fn test_solved_assignment_satisfies_linking_invariants() {
        let mut model = tiny_model(1.0);
        let range = model.add_locations(&[Point::new(0.5, 0.5)]);
        let mut rng = StdRng::seed_from_u64(2);
        model.add_samples(2, &mut rng).unwrap();
        model.extend_constraints(range.clone());
        model.extend_objective(range);

        let assignment = model.solve(SolveOptions::default()).unwrap();
        assert_eq!(assignment.status, SolveStatus::Optimal);
        let capacity = model.station().capacity;
        let queue = model.station().queue_size;
        for k in 0..model.n_candidates() {
            let built = assignment.built[k] as u32;
            let count = assignment.count[k];
            assert!(built <= count);
            assert!(count <= capacity * built);
            for s in 0..model.n_samples() {
                let load = assignment.allocated_vehicles(s, k).len() as u32;
                assert!(load <= queue * count);
            }
        }
        // Full service: all four vehicles allocated in every sample.
        for pairs in &assignment.alloc {
            assert_eq!(pairs.len(), 4);
        }
    }

    #[test]
    fn test_fixed_station_count_constraint_created_and_extended() {
        let mut model = tiny_model(0.5);
        let station = StationParams::new(8, 2, 0.5, Some(1)).unwrap();
        model.station = station;

        let first = model.add_locations(&[Point::new(0.2, 0.2)]);
        let mut rng = StdRng::seed_from_u64(3);
        model.add_samples(1, &mut rng).unwrap();
        model.extend_constraints(first.clone());
        model.extend_objective(first);

        let second = model.add_locations(&[Point::new(0.8, 0.8)]);
        model.extend_constraints(second.clone());
        model.extend_objective(second);

        let assignment = model.solve(SolveOptions::default()).unwrap();
        assert_eq!(assignment.n_built(), 1);
    }

    #[test]
    fn test_warm_start_kpi_matches_resolve() {
        let mut model = tiny_model(1.0);
        let range = model.add_locations(&[Point::new(0.5, 0.5)]);
        let mut rng = StdRng::seed_from_u64(4);
        model.add_samples(1, &mut rng).unwrap();
        model.extend_constraints(range.clone());
        model.extend_objective(range);

        let assignment = model.solve(SolveOptions::default()).unwrap();
        let start = model.assignment_to_partial(&assignment, "echo");
        let kpi = model.warm_start_kpi(KPI_TOTAL, &start).unwrap();
        assert!((kpi - assignment.total_cost()).abs() < 1e-6);
    }
}
