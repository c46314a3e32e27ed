//! # evsite-solve: Charging-Network Placement Algorithms
//!
//! Designs a charging-station network for a fleet of vehicles with
//! uncertain daily range, minimizing build, maintenance, drive and charge
//! cost under a minimum service-level guarantee.
//!
//! The core is an iterative mixed-integer location-improvement heuristic:
//!
//! ```text
//! seed candidates -> draw demand samples -> build incremental MILP
//!   loop {
//!     solve                       (black-box backend, time-limited)
//!     refine built positions      (constrained geometric median)
//!     filter proposals            (probabilistic proximity filter)
//!     extend model                (columns/variables/constraints only grow)
//!     warm-start next solve
//!   } until stable or no useful proposals
//! finalize -> Monte-Carlo allocation evaluation
//! ```
//!
//! ## Architecture
//!
//! - [`ProblemModel`] owns the growing MILP state and delegates solving to a
//!   [`milp::MilpBackend`]; backends are interchangeable behind the trait.
//! - [`LocationPlanner`] orchestrates the outer loop and reports a
//!   [`PlanOutcome`] with per-iteration history and the final MIP gap.
//! - [`AllocationEvaluator`] stress-tests a finalized network against fresh
//!   demand draws.
//!
//! All randomness flows through explicitly passed `rand` sources, so runs
//! are repeatable given the same seeds.

pub mod convergence;
pub mod evaluate;
pub mod filter;
pub mod improve;
pub mod matching;
pub mod milp;
pub mod model;
pub mod planner;
pub mod sample;
pub mod warmstart;

pub use convergence::{ConvergenceMonitor, ConvergenceState};
pub use evaluate::{AllocationEvaluator, DrawRecord, EvaluationConfig, EvaluationReport};
pub use filter::{filter_locations, FilterParams};
pub use improve::{
    constrained_geometric_median, improve_built_locations, ImprovedLocation, ImprovementOutcome,
};
pub use matching::{max_matching, max_service_fraction};
pub use milp::{BranchBoundBackend, MilpBackend, SolveOptions, SolveStatus};
#[cfg(feature = "solver-highs")]
pub use milp::HighsBackend;
pub use model::{Assignment, ProblemModel};
pub use planner::{
    IterationSnapshot, LocationPlanner, PlanOutcome, PlannerConfig, ProgressObserver, SeedMode,
};
pub use sample::{Sample, ScenarioParams};
pub use warmstart::build_warm_start;
