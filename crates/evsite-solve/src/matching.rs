//! Capacity-constrained bipartite matching over a reachability graph.
//!
//! Answers "how many vehicles could possibly be served" for a sample, which
//! upper-bounds the attainable service level. Used as a cheap feasibility
//! pre-check before committing to a full MILP solve, and by the evaluator to
//! clamp per-draw service targets.

/// Maximum number of vehicles that can be simultaneously assigned, with
/// location `k` accepting at most `capacities[k]` vehicles.
///
/// Augmenting-path search on the bipartite graph; each saturated location
/// tries to relocate one of its occupants before rejecting a newcomer.
pub fn max_matching(
    n_vehicles: usize,
    capacities: &[u32],
    reachable: impl Fn(usize, usize) -> bool,
) -> usize {
    let n_loc = capacities.len();
    let mut assigned: Vec<Vec<usize>> = vec![Vec::new(); n_loc];

    for i in 0..n_vehicles {
        let mut visited = vec![false; n_loc];
        augment(i, &mut visited, &mut assigned, capacities, &reachable);
    }

    assigned.iter().map(Vec::len).sum()
}

/// Served fraction under the best possible assignment.
pub fn max_service_fraction(
    n_vehicles: usize,
    capacities: &[u32],
    reachable: impl Fn(usize, usize) -> bool,
) -> f64 {
    if n_vehicles == 0 {
        return 1.0;
    }
    max_matching(n_vehicles, capacities, reachable) as f64 / n_vehicles as f64
}

fn augment(
    vehicle: usize,
    visited: &mut [bool],
    assigned: &mut Vec<Vec<usize>>,
    capacities: &[u32],
    reachable: &impl Fn(usize, usize) -> bool,
) -> bool {
    for k in 0..capacities.len() {
        if visited[k] || !reachable(vehicle, k) {
            continue;
        }
        visited[k] = true;

        if assigned[k].len() < capacities[k] as usize {
            assigned[k].push(vehicle);
            return true;
        }
        for slot in 0..assigned[k].len() {
            let occupant = assigned[k][slot];
            if augment(occupant, visited, assigned, capacities, reachable) {
                assigned[k][slot] = vehicle;
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_reachable_location_serves_nothing() {
        let served = max_service_fraction(4, &[8], |_, _| false);
        assert_eq!(served, 0.0);
    }

    #[test]
    fn test_everyone_reaches_one_big_location() {
        let served = max_service_fraction(4, &[8], |_, _| true);
        assert_eq!(served, 1.0);
    }

    #[test]
    fn test_capacity_binds() {
        // 5 vehicles, one location with room for 2.
        assert_eq!(max_matching(5, &[2], |_, _| true), 2);
    }

    #[test]
    fn test_relocation_frees_a_slot() {
        // Vehicle 0 reaches both locations, vehicle 1 only location 0.
        // Greedy puts 0 on location 0; the augmenting path must move it.
        let reachable = |i: usize, k: usize| match (i, k) {
            (0, _) => true,
            (1, 0) => true,
            _ => false,
        };
        assert_eq!(max_matching(2, &[1, 1], reachable), 2);
    }

    #[test]
    fn test_zero_vehicles_is_fully_served() {
        assert_eq!(max_service_fraction(0, &[1], |_, _| true), 1.0);
    }
}
