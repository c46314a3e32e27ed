//! Incremental MILP model store and the solver backend seam.
//!
//! The placement heuristic never talks to a solving engine directly. It
//! grows a [`ModelBuilder`] - variables, named constraints, objective and
//! KPI expressions, all strictly additive - and hands the whole store to a
//! [`MilpBackend`] for each solve. Backends are interchangeable behind the
//! trait; the orchestration core depends only on this seam.
//!
//! Aggregate constraints (service level, at-most-one allocation, fixed
//! station count) span the old *and* new candidate sets jointly, so they are
//! looked up by name and algebraically extended rather than re-created; see
//! [`ModelBuilder::extend_constraint`].

mod branch_bound;
#[cfg(feature = "solver-highs")]
mod highs;

pub use branch_bound::BranchBoundBackend;
#[cfg(feature = "solver-highs")]
pub use highs::HighsBackend;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use evsite_core::{PlanError, PlanResult};

/// Stable handle of a decision variable. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Stable handle of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstraintId(usize);

/// Variable domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// {0, 1}
    Binary,
    /// {0, 1, ..., ub}
    Integer { ub: u32 },
}

impl VarKind {
    pub fn upper_bound(self) -> u32 {
        match self {
            VarKind::Binary => 1,
            VarKind::Integer { ub } => ub,
        }
    }
}

/// A named decision variable.
#[derive(Debug, Clone)]
pub struct VarDef {
    pub name: String,
    pub kind: VarKind,
}

/// Constraint sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// Sparse linear expression: `Σ coef·var + constant`.
#[derive(Debug, Clone, Default)]
pub struct LinExpr {
    terms: Vec<(VarId, f64)>,
    constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) -> &mut Self {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
        self
    }

    pub fn add_constant(&mut self, value: f64) -> &mut Self {
        self.constant += value;
        self
    }

    /// Builder-style term addition.
    pub fn with_term(mut self, var: VarId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    /// `Σ var` over a set of variables, unit coefficients.
    pub fn sum(vars: impl IntoIterator<Item = VarId>) -> Self {
        let mut expr = Self::new();
        for v in vars {
            expr.add_term(v, 1.0);
        }
        expr
    }

    /// Algebraically extend this expression with another one.
    pub fn extend(&mut self, other: &LinExpr) {
        self.terms.extend_from_slice(&other.terms);
        self.constant += other.constant;
    }

    /// Multiply every term and the constant by `factor`.
    pub fn scaled(&self, factor: f64) -> LinExpr {
        LinExpr {
            terms: self.terms.iter().map(|&(v, c)| (v, c * factor)).collect(),
            constant: self.constant * factor,
        }
    }

    /// Evaluate under a complete assignment indexed by [`VarId`].
    pub fn eval(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(v, c)| c * values[v.index()])
            .sum::<f64>()
            + self.constant
    }
}

/// A named linear constraint `expr (<=|>=|==) rhs`.
#[derive(Debug, Clone)]
pub struct ConstraintDef {
    pub name: String,
    pub expr: LinExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl ConstraintDef {
    /// Whether `values` satisfies this constraint within `tol`.
    pub fn satisfied(&self, values: &[f64], tol: f64) -> bool {
        let lhs = self.expr.eval(values);
        match self.sense {
            Sense::Le => lhs <= self.rhs + tol,
            Sense::Ge => lhs >= self.rhs - tol,
            Sense::Eq => (lhs - self.rhs).abs() <= tol,
        }
    }
}

/// The incremental model store.
///
/// Variables and constraints are only ever appended; handles stay valid for
/// the life of the model. This is what keeps prior solutions mappable onto
/// the enlarged variable space across outer iterations.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    vars: Vec<VarDef>,
    constraints: Vec<ConstraintDef>,
    constraints_by_name: HashMap<String, ConstraintId>,
    objective: LinExpr,
    kpis: Vec<(String, LinExpr)>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(VarDef {
            name: name.into(),
            kind: VarKind::Binary,
        });
        id
    }

    pub fn add_integer(&mut self, name: impl Into<String>, ub: u32) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(VarDef {
            name: name.into(),
            kind: VarKind::Integer { ub },
        });
        id
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn vars(&self) -> &[VarDef] {
        &self.vars
    }

    pub fn constraints(&self) -> &[ConstraintDef] {
        &self.constraints
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        expr: LinExpr,
        sense: Sense,
        rhs: f64,
    ) -> ConstraintId {
        let name = name.into();
        debug_assert!(
            !self.constraints_by_name.contains_key(&name),
            "duplicate constraint name {name}"
        );
        let id = ConstraintId(self.constraints.len());
        self.constraints_by_name.insert(name.clone(), id);
        self.constraints.push(ConstraintDef {
            name,
            expr,
            sense,
            rhs,
        });
        id
    }

    pub fn constraint_by_name(&self, name: &str) -> Option<ConstraintId> {
        self.constraints_by_name.get(name).copied()
    }

    /// Extend the left-hand sum of an existing constraint with new terms.
    pub fn extend_constraint(&mut self, id: ConstraintId, extra: &LinExpr) {
        self.constraints[id.0].expr.extend(extra);
    }

    pub fn set_objective(&mut self, expr: LinExpr) {
        self.objective = expr;
    }

    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }

    /// Register (or replace) a KPI expression under `name`.
    pub fn set_kpi(&mut self, name: impl Into<String>, expr: LinExpr) {
        let name = name.into();
        if let Some(slot) = self.kpis.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = expr;
        } else {
            self.kpis.push((name, expr));
        }
    }

    pub fn kpi_names(&self) -> impl Iterator<Item = &str> {
        self.kpis.iter().map(|(n, _)| n.as_str())
    }

    /// Evaluate a KPI under a complete assignment.
    pub fn kpi_value(&self, name: &str, values: &[f64]) -> PlanResult<f64> {
        self.kpis
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, expr)| expr.eval(values))
            .ok_or_else(|| PlanError::Solver(format!("unknown KPI {name}")))
    }

    /// Evaluate every KPI under a complete assignment.
    pub fn kpi_values(&self, values: &[f64]) -> HashMap<String, f64> {
        self.kpis
            .iter()
            .map(|(n, expr)| (n.clone(), expr.eval(values)))
            .collect()
    }
}

/// Sparse nonzero-only variable assignment used as a warm start.
///
/// The backend completes the unassigned remainder (with zeros in the
/// reference backend).
#[derive(Debug, Clone)]
pub struct PartialAssignment {
    name: String,
    values: Vec<(VarId, f64)>,
}

impl PartialAssignment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a nonzero value; zeros are the implicit default.
    pub fn set(&mut self, var: VarId, value: f64) {
        if value != 0.0 {
            self.values.push((var, value));
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, f64)> + '_ {
        self.values.iter().copied()
    }

    /// Complete to a dense assignment of `n` variables, zero-filled.
    pub fn dense(&self, n: usize) -> Vec<f64> {
        let mut values = vec![0.0; n];
        for &(v, x) in &self.values {
            values[v.index()] = x;
        }
        values
    }
}

/// Outcome status of one backend solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Proven optimal.
    Optimal,
    /// Wall-clock limit hit; best incumbent returned.
    TimeLimit,
    /// Solution limit hit; best incumbent returned.
    SolutionLimit,
    /// No feasible assignment exists.
    Infeasible,
}

impl SolveStatus {
    /// Limits are recoverable: the loop proceeds with the incumbent.
    pub fn is_recoverable(self) -> bool {
        matches!(self, SolveStatus::TimeLimit | SolveStatus::SolutionLimit)
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::TimeLimit => write!(f, "time limit exceeded"),
            SolveStatus::SolutionLimit => write!(f, "solution limit exceeded"),
            SolveStatus::Infeasible => write!(f, "infeasible"),
        }
    }
}

/// Per-call solve limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveOptions {
    /// Wall-clock budget for this call (not the whole run).
    pub time_limit: Option<Duration>,
    /// Stop after this many incumbent improvements.
    pub solution_limit: Option<u32>,
}

/// Result of one backend solve.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// Objective of the returned assignment (meaningless when infeasible).
    pub objective: f64,
    /// Complete assignment indexed by [`VarId`]; empty when infeasible.
    pub values: Vec<f64>,
    /// Absolute gap between incumbent and proven bound.
    pub gap_abs: f64,
    /// `gap_abs` relative to the incumbent objective.
    pub gap_rel: f64,
}

/// A mixed-integer solving engine.
///
/// Implementations are interchangeable; the heuristic holds one behind
/// `Box<dyn MilpBackend>` and treats each solve as an atomic black-box call.
pub trait MilpBackend {
    /// Unique identifier (e.g. "branch-bound", "highs").
    fn id(&self) -> &str;

    /// Solve the current model store.
    fn solve(
        &mut self,
        model: &ModelBuilder,
        options: SolveOptions,
        warm_start: Option<&PartialAssignment>,
    ) -> PlanResult<SolveOutcome>;
}
