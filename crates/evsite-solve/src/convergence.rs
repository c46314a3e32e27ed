//! Outer-loop convergence monitoring.
//!
//! Two states, iterating and stable; the only other way out of the loop is
//! the infeasibility abort. The heuristic is stable when the solved
//! objective sits within tolerance of what its own warm start already
//! promised, or when the proximity filter accepted no new location (no
//! further useful moves exist).

use serde::{Deserialize, Serialize};
use tracing::info;

/// Monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceState {
    Iterating,
    Stable,
}

impl ConvergenceState {
    pub fn is_stable(self) -> bool {
        matches!(self, ConvergenceState::Stable)
    }
}

/// Decides whether the improvement loop keeps iterating.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    epsilon: f64,
    state: ConvergenceState,
}

impl ConvergenceMonitor {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            state: ConvergenceState::Iterating,
        }
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    /// Feed the iteration's outcome; returns the new state.
    ///
    /// `solved_total` is the realized total cost of the solved assignment,
    /// `warmstart_total` the total cost the freshly built warm start
    /// reports, and `accepted` how many locations the filter let through.
    pub fn observe(
        &mut self,
        solved_total: f64,
        warmstart_total: f64,
        accepted: usize,
    ) -> ConvergenceState {
        if accepted == 0 {
            info!("no new locations accepted; stopping");
            self.state = ConvergenceState::Stable;
        } else if (solved_total - warmstart_total).abs() <= self.epsilon {
            info!(
                solved_total,
                warmstart_total, "objective stable within tolerance; stopping"
            );
            self.state = ConvergenceState::Stable;
        }
        self.state
    }
}
