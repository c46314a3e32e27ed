//! Exact reference backend: depth-first branch-and-bound.
//!
//! Enumerates the integer lattice depth-first with incumbent pruning and
//! per-constraint interval propagation. Warm starts seed the incumbent, the
//! wall-clock limit bails out with the best assignment found so far, and the
//! reported gap is the distance between the incumbent and the best bound of
//! any subtree left unexplored.
//!
//! This backend is exact and deterministic but enumerative: it is meant for
//! the model sizes the heuristic produces in tests and small studies. Large
//! instances belong on an external engine behind the same trait.

use std::time::Instant;

use tracing::{debug, warn};

use evsite_core::{PlanError, PlanResult};

use super::{
    MilpBackend, ModelBuilder, PartialAssignment, Sense, SolveOptions, SolveOutcome, SolveStatus,
};

const FEAS_TOL: f64 = 1e-6;
const OBJ_TOL: f64 = 1e-9;

/// Why the search stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    TimeLimit,
    SolutionLimit,
}

/// Exact depth-first branch-and-bound over the model's integer variables.
pub struct BranchBoundBackend {
    /// Safety valve against runaway enumerations; treated like a time limit.
    pub node_limit: u64,
}

impl Default for BranchBoundBackend {
    fn default() -> Self {
        Self {
            node_limit: 10_000_000,
        }
    }
}

struct Search<'a> {
    model: &'a ModelBuilder,
    ub: Vec<f64>,
    obj_coef: Vec<f64>,
    /// Suffix bound of the objective over variables `d..n` (each at its
    /// cheapest value).
    suffix_obj_min: Vec<f64>,
    /// Per-constraint dense coefficients and suffix contribution bounds.
    cons_coef: Vec<Vec<f64>>,
    cons_suffix_min: Vec<Vec<f64>>,
    cons_suffix_max: Vec<Vec<f64>>,

    values: Vec<f64>,
    lhs: Vec<f64>,
    partial_obj: f64,

    incumbent: Option<Vec<f64>>,
    incumbent_obj: f64,
    improvements: u32,

    deadline: Option<Instant>,
    node_limit: u64,
    solution_limit: Option<u32>,
    nodes: u64,
    stop: Option<Stop>,
    /// Best (lowest) objective bound among abandoned subtrees.
    abandoned_bound: f64,
}

impl<'a> Search<'a> {
    fn new(model: &'a ModelBuilder, options: SolveOptions, node_limit: u64) -> Self {
        let n = model.num_vars();
        let ub: Vec<f64> = model
            .vars()
            .iter()
            .map(|v| v.kind.upper_bound() as f64)
            .collect();

        let mut obj_coef = vec![0.0; n];
        for &(v, c) in model.objective().terms() {
            obj_coef[v.index()] += c;
        }
        let mut suffix_obj_min = vec![0.0; n + 1];
        for d in (0..n).rev() {
            suffix_obj_min[d] = suffix_obj_min[d + 1] + (obj_coef[d] * ub[d]).min(0.0);
        }

        let n_cons = model.constraints().len();
        let mut cons_coef = vec![vec![0.0; n]; n_cons];
        let mut lhs = vec![0.0; n_cons];
        for (c, cons) in model.constraints().iter().enumerate() {
            lhs[c] = cons.expr.constant_part();
            for &(v, coef) in cons.expr.terms() {
                cons_coef[c][v.index()] += coef;
            }
        }
        let mut cons_suffix_min = vec![vec![0.0; n + 1]; n_cons];
        let mut cons_suffix_max = vec![vec![0.0; n + 1]; n_cons];
        for c in 0..n_cons {
            for d in (0..n).rev() {
                let reach = cons_coef[c][d] * ub[d];
                cons_suffix_min[c][d] = cons_suffix_min[c][d + 1] + reach.min(0.0);
                cons_suffix_max[c][d] = cons_suffix_max[c][d + 1] + reach.max(0.0);
            }
        }

        Self {
            model,
            ub,
            obj_coef,
            suffix_obj_min,
            cons_coef,
            cons_suffix_min,
            cons_suffix_max,
            values: vec![0.0; n],
            lhs,
            partial_obj: model.objective().constant_part(),
            incumbent: None,
            incumbent_obj: f64::INFINITY,
            improvements: 0,
            deadline: options.time_limit.map(|d| Instant::now() + d),
            node_limit,
            solution_limit: options.solution_limit,
            nodes: 0,
            stop: None,
            abandoned_bound: f64::INFINITY,
        }
    }

    fn seed_incumbent(&mut self, warm_start: &PartialAssignment) {
        let n = self.model.num_vars();
        if warm_start.iter().any(|(v, _)| v.index() >= n) {
            warn!(
                name = warm_start.name(),
                "warm start references unknown variables; ignoring"
            );
            return;
        }
        let dense = warm_start.dense(n);
        let integral = dense.iter().enumerate().all(|(i, &x)| {
            (x - x.round()).abs() <= FEAS_TOL && x >= -FEAS_TOL && x <= self.ub[i] + FEAS_TOL
        });
        let feasible = integral
            && self
                .model
                .constraints()
                .iter()
                .all(|c| c.satisfied(&dense, FEAS_TOL));
        if feasible {
            self.incumbent_obj = self.model.objective().eval(&dense);
            debug!(
                name = warm_start.name(),
                objective = self.incumbent_obj,
                "warm start accepted as initial incumbent"
            );
            self.incumbent = Some(dense);
        } else {
            warn!(
                name = warm_start.name(),
                "warm start is infeasible for the current model; ignoring"
            );
        }
    }

    fn out_of_budget(&mut self) -> bool {
        if self.stop.is_some() {
            return true;
        }
        if self.nodes > self.node_limit {
            warn!(nodes = self.nodes, "node limit reached; stopping search");
            self.stop = Some(Stop::TimeLimit);
            return true;
        }
        if self.nodes % 1024 == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.stop = Some(Stop::TimeLimit);
                    return true;
                }
            }
        }
        false
    }

    fn dfs(&mut self, d: usize) {
        let n = self.model.num_vars();
        let ub = self.ub[d] as u32;
        for value in 0..=ub {
            if self.out_of_budget() {
                self.abandoned_bound = self
                    .abandoned_bound
                    .min(self.partial_obj + self.suffix_obj_min[d]);
                return;
            }
            self.nodes += 1;

            let x = value as f64;
            self.values[d] = x;
            self.partial_obj += self.obj_coef[d] * x;
            for c in 0..self.lhs.len() {
                self.lhs[c] += self.cons_coef[c][d] * x;
            }

            if !self.pruned(d + 1) {
                if d + 1 == n {
                    self.record_leaf();
                } else {
                    self.dfs(d + 1);
                }
            }

            self.partial_obj -= self.obj_coef[d] * x;
            for c in 0..self.lhs.len() {
                self.lhs[c] -= self.cons_coef[c][d] * x;
            }
        }
    }

    /// Can any completion of variables `d..n` beat the incumbent and satisfy
    /// every constraint?
    fn pruned(&self, d: usize) -> bool {
        if self.partial_obj + self.suffix_obj_min[d] >= self.incumbent_obj - OBJ_TOL {
            return true;
        }
        for (c, cons) in self.model.constraints().iter().enumerate() {
            let lo = self.lhs[c] + self.cons_suffix_min[c][d];
            let hi = self.lhs[c] + self.cons_suffix_max[c][d];
            let violated = match cons.sense {
                Sense::Le => lo > cons.rhs + FEAS_TOL,
                Sense::Ge => hi < cons.rhs - FEAS_TOL,
                Sense::Eq => lo > cons.rhs + FEAS_TOL || hi < cons.rhs - FEAS_TOL,
            };
            if violated {
                return true;
            }
        }
        false
    }

    fn record_leaf(&mut self) {
        // Interval checks are exact at a leaf, so this assignment is feasible.
        if self.partial_obj < self.incumbent_obj - OBJ_TOL {
            self.incumbent_obj = self.partial_obj;
            self.incumbent = Some(self.values.clone());
            self.improvements += 1;
            debug!(
                objective = self.incumbent_obj,
                nodes = self.nodes,
                "new incumbent"
            );
            if let Some(limit) = self.solution_limit {
                if self.improvements >= limit {
                    self.stop = Some(Stop::SolutionLimit);
                }
            }
        }
    }
}

impl MilpBackend for BranchBoundBackend {
    fn id(&self) -> &str {
        "branch-bound"
    }

    fn solve(
        &mut self,
        model: &ModelBuilder,
        options: SolveOptions,
        warm_start: Option<&PartialAssignment>,
    ) -> PlanResult<SolveOutcome> {
        if model.num_vars() == 0 {
            // Constant model: feasibility is decided by the constants alone.
            let feasible = model
                .constraints()
                .iter()
                .all(|c| c.satisfied(&[], FEAS_TOL));
            let status = if feasible {
                SolveStatus::Optimal
            } else {
                SolveStatus::Infeasible
            };
            return Ok(SolveOutcome {
                status,
                objective: if feasible {
                    model.objective().constant_part()
                } else {
                    0.0
                },
                values: Vec::new(),
                gap_abs: 0.0,
                gap_rel: 0.0,
            });
        }

        let mut search = Search::new(model, options, self.node_limit);
        if let Some(start) = warm_start {
            search.seed_incumbent(start);
        }
        search.dfs(0);

        let Some(values) = search.incumbent else {
            return match search.stop {
                Some(_) => Err(PlanError::Solver(
                    "limit reached before any feasible solution was found".into(),
                )),
                None => Ok(SolveOutcome {
                    status: SolveStatus::Infeasible,
                    objective: 0.0,
                    values: Vec::new(),
                    gap_abs: 0.0,
                    gap_rel: 0.0,
                }),
            };
        };

        let (status, gap_abs) = match search.stop {
            None => (SolveStatus::Optimal, 0.0),
            Some(stop) => {
                let bound = search.abandoned_bound.min(search.incumbent_obj);
                let gap = search.incumbent_obj - bound;
                match stop {
                    Stop::TimeLimit => (SolveStatus::TimeLimit, gap),
                    Stop::SolutionLimit => (SolveStatus::SolutionLimit, gap),
                }
            }
        };
        let gap_rel = gap_abs / search.incumbent_obj.abs().max(1e-10);

        debug!(
            backend = self.id(),
            %status,
            objective = search.incumbent_obj,
            nodes = search.nodes,
            "solve finished"
        );
        Ok(SolveOutcome {
            status,
            objective: search.incumbent_obj,
            values,
            gap_abs,
            gap_rel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milp::LinExpr;

    fn solve(model: &ModelBuilder) -> SolveOutcome {
        BranchBoundBackend::default()
            .solve(model, SolveOptions::default(), None)
            .unwrap()
    }

    #[test]
    fn test_simple_covering_problem() {
        // min 3a + 2b + 4c  s.t. a + b >= 1, b + c >= 1
        let mut m = ModelBuilder::new();
        let a = m.add_binary("a");
        let b = m.add_binary("b");
        let c = m.add_binary("c");
        m.add_constraint("cover_ab", LinExpr::sum([a, b]), Sense::Ge, 1.0);
        m.add_constraint("cover_bc", LinExpr::sum([b, c]), Sense::Ge, 1.0);
        m.set_objective(
            LinExpr::new()
                .with_term(a, 3.0)
                .with_term(b, 2.0)
                .with_term(c, 4.0),
        );

        let outcome = solve(&m);
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.values, vec![0.0, 1.0, 0.0]);
        assert!((outcome.objective - 2.0).abs() < 1e-9);
        assert_eq!(outcome.gap_abs, 0.0);
    }

    #[test]
    fn test_integer_bounds_respected() {
        // min -x subject to x <= 7, x integer in 0..=5 -> x = 5
        let mut m = ModelBuilder::new();
        let x = m.add_integer("x", 5);
        m.add_constraint("cap", LinExpr::sum([x]), Sense::Le, 7.0);
        m.set_objective(LinExpr::new().with_term(x, -1.0));

        let outcome = solve(&m);
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.values, vec![5.0]);
        assert!((outcome.objective + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_infeasible_detected() {
        let mut m = ModelBuilder::new();
        let a = m.add_binary("a");
        m.add_constraint("ge2", LinExpr::sum([a]), Sense::Ge, 2.0);
        m.set_objective(LinExpr::sum([a]));

        let outcome = solve(&m);
        assert_eq!(outcome.status, SolveStatus::Infeasible);
        assert!(outcome.values.is_empty());
    }

    #[test]
    fn test_warm_start_seeds_incumbent() {
        let mut m = ModelBuilder::new();
        let a = m.add_binary("a");
        let b = m.add_binary("b");
        m.add_constraint("pick_one", LinExpr::sum([a, b]), Sense::Ge, 1.0);
        m.set_objective(LinExpr::new().with_term(a, 1.0).with_term(b, 5.0));

        let mut start = PartialAssignment::new("warm start");
        start.set(b, 1.0);

        let outcome = BranchBoundBackend::default()
            .solve(&m, SolveOptions::default(), Some(&start))
            .unwrap();
        // The search must still find the cheaper assignment.
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.values, vec![1.0, 0.0]);
    }

    #[test]
    fn test_equality_constraint() {
        let mut m = ModelBuilder::new();
        let a = m.add_binary("a");
        let b = m.add_binary("b");
        let c = m.add_binary("c");
        m.add_constraint("exactly_two", LinExpr::sum([a, b, c]), Sense::Eq, 2.0);
        m.set_objective(
            LinExpr::new()
                .with_term(a, 1.0)
                .with_term(b, 2.0)
                .with_term(c, 3.0),
        );

        let outcome = solve(&m);
        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.values, vec![1.0, 1.0, 0.0]);
        assert!((outcome.objective - 3.0).abs() < 1e-9);
    }
}
