//! Monte-Carlo stress test of a finalized network.
//!
//! Draws fresh demand realizations (charging vehicles only) against the
//! fixed built locations and solves a small allocation-only MILP per draw:
//! at-most-one assignment per vehicle, a queue cap of two vehicles per
//! charger, and the service-level guarantee clamped down to whatever the
//! draw's reachability makes attainable. Aggregate statistics are reported
//! separately for draws that met and missed the nominal service level, so
//! the clamping is visible to the caller.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use evsite_core::constants::{ANNUALIZATION_DAYS, DEFAULT_SERVICE_LEVEL};
use evsite_core::{CostParams, Fleet, PlanError, PlanResult, Point};

use crate::milp::{LinExpr, MilpBackend, ModelBuilder, Sense, SolveOptions, SolveStatus};
use crate::sample::{Sample, ScenarioParams};

/// Evaluator configuration.
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Number of demand draws.
    pub iterations: usize,
    /// Wall-clock budget per allocation solve.
    pub time_limit: Option<Duration>,
    /// Nominal service-level target.
    pub service_level: f64,
    /// Demand draw parameters.
    pub scenario: ScenarioParams,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            iterations: 50,
            time_limit: Some(Duration::from_secs(60)),
            service_level: DEFAULT_SERVICE_LEVEL,
            scenario: ScenarioParams::default(),
        }
    }
}

/// Result of one demand draw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawRecord {
    pub objective: f64,
    pub build_maintenance_cost: f64,
    pub drive_charge_cost: f64,
    pub fixed_charge_cost: f64,
    /// Service level actually enforced (clamped when unattainable).
    pub service_level: f64,
    pub attainable_service_level: f64,
    pub gap_abs: f64,
    /// Whether the draw could meet the nominal target.
    pub met_nominal: bool,
    /// Charging vehicles in the draw.
    pub vehicles: usize,
}

/// Aggregated evaluation results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub nominal_service_level: f64,
    pub records: Vec<DrawRecord>,
}

impl EvaluationReport {
    pub fn n_feasible(&self) -> usize {
        self.records.iter().filter(|r| r.met_nominal).count()
    }

    pub fn mean_objective_feasible(&self) -> Option<f64> {
        mean(
            self.records
                .iter()
                .filter(|r| r.met_nominal)
                .map(|r| r.objective),
        )
    }

    pub fn mean_objective_infeasible(&self) -> Option<f64> {
        mean(
            self.records
                .iter()
                .filter(|r| !r.met_nominal)
                .map(|r| r.objective),
        )
    }

    pub fn mean_service_level_infeasible(&self) -> Option<f64> {
        mean(
            self.records
                .iter()
                .filter(|r| !r.met_nominal)
                .map(|r| r.service_level),
        )
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        None
    } else {
        Some(collected.iter().sum::<f64>() / collected.len() as f64)
    }
}

/// Repeatedly solves the allocation-only model against fresh draws.
pub struct AllocationEvaluator {
    built: Vec<Point>,
    counts: Vec<u32>,
    costs: CostParams,
    backend: Box<dyn MilpBackend>,
}

impl AllocationEvaluator {
    pub fn new(
        built: Vec<Point>,
        counts: Vec<u32>,
        costs: CostParams,
        backend: Box<dyn MilpBackend>,
    ) -> PlanResult<Self> {
        if built.is_empty() {
            return Err(PlanError::Validation(
                "the evaluated network has no built locations".into(),
            ));
        }
        if built.len() != counts.len() {
            return Err(PlanError::Validation(
                "built locations and charger counts must align".into(),
            ));
        }
        Ok(Self {
            built,
            counts,
            costs,
            backend,
        })
    }

    pub fn evaluate(
        &mut self,
        fleet: &Fleet,
        config: &EvaluationConfig,
        rng: &mut impl Rng,
    ) -> PlanResult<EvaluationReport> {
        let build_maintenance = self.costs.maintenance_cost
            * self.counts.iter().sum::<u32>() as f64
            + self.costs.build_cost * self.built.len() as f64;
        info!(
            iterations = config.iterations,
            locations = self.built.len(),
            "starting allocation evaluation"
        );

        let mut records = Vec::with_capacity(config.iterations);
        for draw in 0..config.iterations {
            let sample = Sample::draw(fleet, &self.built, &config.scenario, rng)?;
            debug!(draw, vehicles = sample.n_vehicles(), "draw generated");

            if sample.n_vehicles() == 0 {
                records.push(DrawRecord {
                    objective: build_maintenance,
                    build_maintenance_cost: build_maintenance,
                    drive_charge_cost: 0.0,
                    fixed_charge_cost: 0.0,
                    service_level: config.service_level,
                    attainable_service_level: 1.0,
                    gap_abs: 0.0,
                    met_nominal: true,
                    vehicles: 0,
                });
                continue;
            }

            // Each charger serves up to two vehicles per day.
            let queue_caps: Vec<u32> = self.counts.iter().map(|&c| 2 * c).collect();
            let attainable = sample.max_service_level(&queue_caps);
            let met_nominal = attainable >= config.service_level;
            let target = if met_nominal {
                config.service_level
            } else {
                warn!(
                    draw,
                    attainable, "nominal service level unattainable; clamping target"
                );
                attainable
            };

            let record = self.solve_draw(
                &sample,
                target,
                attainable,
                met_nominal,
                build_maintenance,
                config,
            )?;
            records.push(record);
        }

        let report = EvaluationReport {
            nominal_service_level: config.service_level,
            records,
        };
        info!(
            feasible = report.n_feasible(),
            total = report.records.len(),
            "allocation evaluation finished"
        );
        Ok(report)
    }

    fn solve_draw(
        &mut self,
        sample: &Sample,
        target: f64,
        attainable: f64,
        met_nominal: bool,
        build_maintenance: f64,
        config: &EvaluationConfig,
    ) -> PlanResult<DrawRecord> {
        let n_loc = self.built.len();
        let n_vehicles = sample.n_vehicles();
        let drive_charge = self.costs.drive_charge_cost();
        let fixed_charge =
            ANNUALIZATION_DAYS * sample.fixed_charge_cost(self.costs.charge_cost);

        let mut m = ModelBuilder::new();
        let mut cells: Vec<Vec<Option<_>>> = Vec::with_capacity(n_vehicles);
        let mut objective = LinExpr::constant(build_maintenance + fixed_charge);
        let mut service = LinExpr::new();

        for i in 0..n_vehicles {
            let mut row = Vec::with_capacity(n_loc);
            for j in 0..n_loc {
                if sample.reachable(i, j) {
                    let u = m.add_binary(format!("alloc_{i}_{j}"));
                    objective
                        .add_term(u, ANNUALIZATION_DAYS * drive_charge * sample.distance(i, j));
                    service.add_term(u, 1.0);
                    row.push(Some(u));
                } else {
                    row.push(None);
                }
            }
            let present: Vec<_> = row.iter().flatten().copied().collect();
            m.add_constraint(
                format!("alloc_once_{i}"),
                LinExpr::sum(present),
                Sense::Le,
                1.0,
            );
            cells.push(row);
        }
        for j in 0..n_loc {
            let vars: Vec<_> = cells.iter().filter_map(|row| row[j]).collect();
            m.add_constraint(
                format!("queue_{j}"),
                LinExpr::sum(vars),
                Sense::Le,
                (2 * self.counts[j]) as f64,
            );
        }
        m.add_constraint("service", service, Sense::Ge, target * n_vehicles as f64);
        m.set_objective(objective);

        let options = SolveOptions {
            time_limit: config.time_limit,
            solution_limit: None,
        };
        let outcome = self.backend.solve(&m, options, None)?;
        if outcome.status == SolveStatus::Infeasible {
            // The target was clamped to the matching bound, so this points
            // at a modeling bug rather than an unlucky draw.
            return Err(PlanError::infeasible(
                "allocation model infeasible despite clamped service level",
            ));
        }

        let drive_cost = outcome.objective - build_maintenance - fixed_charge;
        debug!(
            objective = outcome.objective,
            drive_cost, target, "draw solved"
        );
        Ok(DrawRecord {
            objective: outcome.objective,
            build_maintenance_cost: build_maintenance,
            drive_charge_cost: drive_cost,
            fixed_charge_cost: fixed_charge,
            service_level: target,
            attainable_service_level: attainable,
            gap_abs: outcome.gap_abs,
            met_nominal,
            vehicles: n_vehicles,
        })
    }
}
