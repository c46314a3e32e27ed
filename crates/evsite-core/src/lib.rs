//! # evsite-core: Charging-Network Planner Core
//!
//! Fundamental data types shared by the placement heuristic and the
//! allocation evaluator:
//!
//! - [`Fleet`] - the immutable demand-point set
//! - [`Point`], [`Matrix`], [`BoolMatrix`] - planar geometry with
//!   append-only column growth for sample bookkeeping
//! - [`CostParams`], [`StationParams`] - cost and sizing configuration
//! - [`PlanError`] / [`PlanResult`] - the unified error type
//!
//! Algorithms live in `evsite-solve`; this crate stays dependency-light so
//! every consumer (solver, CLI, tests) can share the same vocabulary.

pub mod constants;
pub mod error;
pub mod fleet;
pub mod geometry;

pub use constants::{CostParams, StationParams};
pub use error::{PlanError, PlanResult};
pub use fleet::Fleet;
pub use geometry::{distance_matrix, BoolMatrix, Matrix, Point};
