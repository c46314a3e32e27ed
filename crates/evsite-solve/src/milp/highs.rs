//! HiGHS production backend via `good_lp`.
//!
//! Rebuilds a fresh `good_lp` problem from the incremental store on every
//! call; the store itself stays authoritative across iterations. HiGHS
//! resolves the integer variables exactly; per-call limits and warm starts
//! are not surfaced through the `good_lp` API and are logged, not honored.

use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel};

use good_lp::solvers::highs::highs;
use tracing::debug;

use evsite_core::{PlanError, PlanResult};

use super::{
    MilpBackend, ModelBuilder, PartialAssignment, Sense, SolveOptions, SolveOutcome, SolveStatus,
    VarKind,
};

/// `good_lp`/HiGHS-backed solving engine.
#[derive(Debug, Default)]
pub struct HighsBackend;

impl MilpBackend for HighsBackend {
    fn id(&self) -> &str {
        "highs"
    }

    fn solve(
        &mut self,
        model: &ModelBuilder,
        options: SolveOptions,
        warm_start: Option<&PartialAssignment>,
    ) -> PlanResult<SolveOutcome> {
        if let Some(start) = warm_start {
            debug!(
                name = start.name(),
                "warm starts are not forwarded to HiGHS; solving cold"
            );
        }
        if options.time_limit.is_some() || options.solution_limit.is_some() {
            debug!("per-call limits are not forwarded to HiGHS");
        }

        let mut vars = variables!();
        let handles: Vec<_> = model
            .vars()
            .iter()
            .map(|def| match def.kind {
                VarKind::Binary => vars.add(variable().binary()),
                VarKind::Integer { ub } => {
                    vars.add(variable().integer().min(0).max(ub as f64))
                }
            })
            .collect();

        let mut objective = Expression::from(model.objective().constant_part());
        for &(v, c) in model.objective().terms() {
            objective += c * handles[v.index()];
        }

        let mut problem = vars.minimise(objective).using(highs);
        for cons in model.constraints() {
            let mut lhs = Expression::from(cons.expr.constant_part());
            for &(v, c) in cons.expr.terms() {
                lhs += c * handles[v.index()];
            }
            let c = match cons.sense {
                Sense::Le => constraint!(lhs <= cons.rhs),
                Sense::Ge => constraint!(lhs >= cons.rhs),
                Sense::Eq => constraint!(lhs == cons.rhs),
            };
            problem = problem.with(c);
        }

        match problem.solve() {
            Ok(solution) => {
                let values: Vec<f64> = handles.iter().map(|&h| solution.value(h)).collect();
                let objective = model.objective().eval(&values);
                Ok(SolveOutcome {
                    status: SolveStatus::Optimal,
                    objective,
                    values,
                    gap_abs: 0.0,
                    gap_rel: 0.0,
                })
            }
            Err(good_lp::ResolutionError::Infeasible) => Ok(SolveOutcome {
                status: SolveStatus::Infeasible,
                objective: 0.0,
                values: Vec::new(),
                gap_abs: 0.0,
                gap_rel: 0.0,
            }),
            Err(e) => Err(PlanError::Solver(format!("HiGHS failed: {e:?}"))),
        }
    }
}
