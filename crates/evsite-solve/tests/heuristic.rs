//! End-to-end runs of the improvement heuristic on a small fleet.

use std::cell::RefCell;
use std::rc::Rc;

use evsite_core::{CostParams, Fleet, Point, StationParams};
use evsite_solve::filter::FilterParams;
use evsite_solve::milp::BranchBoundBackend;
use evsite_solve::planner::{
    IterationSnapshot, LocationPlanner, PlannerConfig, ProgressObserver, SeedMode,
};
use evsite_solve::{ConvergenceState, ScenarioParams};

use rand::rngs::StdRng;
use rand::SeedableRng;

fn unit_square_fleet() -> Fleet {
    Fleet::new(vec![
        Point::new(0.0, 0.0),
        Point::new(1.0, 0.0),
        Point::new(0.0, 1.0),
        Point::new(1.0, 1.0),
    ])
    .unwrap()
}

fn planner() -> LocationPlanner {
    LocationPlanner::new(
        unit_square_fleet(),
        CostParams {
            build_cost: 10.0,
            maintenance_cost: 1.0,
            ..CostParams::default()
        },
        StationParams::with_service_level(1.0).unwrap(),
        ScenarioParams {
            range_mean: 5.0,
            range_std_dev: 0.0,
            range_floor: 5.0,
            charging_probability: 1.0,
            ..ScenarioParams::default()
        },
        Box::new(BranchBoundBackend::default()),
    )
}

fn config() -> PlannerConfig {
    PlannerConfig {
        samples: 1,
        max_iterations: 4,
        // Tiny min distance so accepted relocations bypass the
        // probabilistic filter and the loop actually iterates.
        filter: FilterParams {
            min_distance: 0.01,
            ..FilterParams::default()
        },
        ..PlannerConfig::default()
    }
}

struct CountingObserver {
    iterations: Rc<RefCell<Vec<usize>>>,
}

impl ProgressObserver for CountingObserver {
    fn on_iteration(&mut self, snapshot: &IterationSnapshot<'_>) {
        assert!(snapshot.assignment.n_built() >= 1);
        assert!(!snapshot.candidates.is_empty());
        self.iterations.borrow_mut().push(snapshot.iteration);
    }
}

#[test]
fn heuristic_terminates_and_serves_everyone() {
    let mut planner = planner();
    let mut rng = StdRng::seed_from_u64(7);
    planner
        .seed_locations(1, SeedMode::UniformRandom, &mut rng)
        .unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    planner.set_observer(Box::new(CountingObserver {
        iterations: Rc::clone(&seen),
    }));

    let outcome = planner.solve(&config(), &mut rng).unwrap();

    assert!(outcome.iterations <= 4);
    assert_eq!(seen.borrow().len(), outcome.iterations);
    assert_eq!(*seen.borrow(), (1..=outcome.iterations).collect::<Vec<_>>());

    // Full service: at least one location, enough chargers for 4 vehicles
    // at 2 per charger.
    assert!(!outcome.built_locations.is_empty());
    assert_eq!(outcome.built_locations.len(), outcome.charger_counts.len());
    assert!(outcome.charger_counts.iter().sum::<u32>() >= 2);
    assert_eq!(outcome.final_assignment.alloc[0].len(), 4);

    // The candidate set only grows, so the optimal objective never
    // regresses across iterations.
    for pair in outcome.objective_history.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-6);
    }

    // Seeding plus one entry per iteration that accepted locations.
    assert!(!outcome.added_history.is_empty());
    assert_eq!(outcome.added_history[0].len(), 1);
}

#[test]
fn stable_runs_report_convergence() {
    let mut planner = planner();
    let mut rng = StdRng::seed_from_u64(21);
    planner.seed_locations_at(&[Point::new(0.4, 0.6)]);

    let cfg = PlannerConfig {
        max_iterations: 10,
        ..config()
    };
    let outcome = planner.solve(&cfg, &mut rng).unwrap();
    // With a tiny fleet the loop either stabilizes on the cost delta or
    // runs out of useful proposals; both are the stable state.
    if outcome.iterations < cfg.max_iterations {
        assert_eq!(outcome.converged, ConvergenceState::Stable);
    }
    assert!(outcome.gap_abs >= 0.0);
    assert!(outcome.gap_rel >= 0.0);
}

#[test]
fn kmeans_seeding_runs_end_to_end() {
    let mut planner = planner();
    let mut rng = StdRng::seed_from_u64(33);
    planner.seed_locations(2, SeedMode::KMeans, &mut rng).unwrap();

    let outcome = planner.solve(&config(), &mut rng).unwrap();
    assert!(!outcome.built_locations.is_empty());
    // KPI breakdown is carried on the final assignment.
    let kpis = &outcome.final_assignment.kpis;
    assert!(kpis.contains_key("total_cost"));
    assert!(kpis.contains_key("build_cost"));
    assert!(kpis.contains_key("drive_charge_cost"));
}
