//! Warm-start construction for the enlarged model.
//!
//! Maps the previous iteration's solution onto the variable space that now
//! includes the accepted refined locations: each accepted location inherits
//! the built/count values and the complete per-sample allocation of the old
//! location it replaces, the replaced and empty locations are zeroed, and
//! only nonzero entries are emitted. The solving engine completes the rest.

use tracing::warn;

use crate::milp::PartialAssignment;
use crate::model::{Assignment, ProblemModel};

/// Build a sparse warm start for `model`'s current (enlarged) variable
/// space.
///
/// `replacements` pairs each accepted refined location's old index with its
/// new candidate index; `empty` lists built locations that served nobody and
/// are zeroed outright.
///
/// A vehicle remapped onto a location it cannot reach indicates a bug in the
/// geometric refinement, not a modeling choice; it is logged and dropped -
/// the model remains authoritative over reachability.
pub fn build_warm_start(
    model: &ProblemModel,
    assignment: &Assignment,
    replacements: &[(usize, usize)],
    empty: &[usize],
) -> PartialAssignment {
    let n = model.n_candidates();
    let mut built = vec![false; n];
    let mut count = vec![0u32; n];
    built[..assignment.built.len()].copy_from_slice(&assignment.built);
    count[..assignment.count.len()].copy_from_slice(&assignment.count);

    for &(old, new) in replacements {
        built[new] = true;
        count[new] = assignment.count[old];
        built[old] = false;
        count[old] = 0;
    }
    for &k in empty {
        built[k] = false;
        count[k] = 0;
    }

    let mut start = PartialAssignment::new("improvement heuristic");
    for k in 0..n {
        if !built[k] {
            continue;
        }
        if count[k] == 0 {
            // A built location with zero chargers cannot be part of any
            // feasible completion; leave both variables to the engine.
            warn!(location = k, "warm start proposes a built location with zero chargers; skipping");
            continue;
        }
        start.set(model.built_var(k), 1.0);
        start.set(model.count_var(k), count[k] as f64);
    }

    for (s, pairs) in assignment.alloc.iter().enumerate() {
        for &(i, k) in pairs {
            let target = replacements
                .iter()
                .find(|&&(old, _)| old == k)
                .map(|&(_, new)| new)
                .unwrap_or(k);
            if !built[target] {
                continue;
            }
            match model.alloc_var(s, i, target) {
                Some(u) => start.set(u, 1.0),
                None => warn!(
                    sample = s,
                    vehicle = i,
                    location = target,
                    "inconsistent remap: vehicle cannot reach its warm-start location"
                ),
            }
        }
    }
    start
}
