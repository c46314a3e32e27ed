//! Model-level scenario tests: a unit-square fleet with one central
//! candidate, infeasibility pre-checks, and the warm-start round trip.

use evsite_core::{CostParams, Fleet, PlanError, Point, StationParams};
use evsite_solve::milp::{
    BranchBoundBackend, MilpBackend, ModelBuilder, PartialAssignment, SolveOptions, SolveOutcome,
};
use evsite_solve::model::{ProblemModel, KPI_TOTAL};
use evsite_solve::planner::{LocationPlanner, PlannerConfig};
use evsite_solve::warmstart::build_warm_start;
use evsite_solve::{ScenarioParams, SolveStatus};

use evsite_core::PlanResult;
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

/// Every vehicle charges and draws range `range` exactly.
fn fixed_range_scenario(range: f64) -> ScenarioParams {
    ScenarioParams {
        range_mean: range,
        range_std_dev: 0.0,
        range_floor: range,
        charging_probability: 1.0,
        ..ScenarioParams::default()
    }
}

fn central_station_model(service_level: f64) -> ProblemModel {
    ProblemModel::new(
        unit_square_fleet(),
        CostParams {
            build_cost: 10.0,
            maintenance_cost: 1.0,
            ..CostParams::default()
        },
        StationParams::with_service_level(service_level).unwrap(),
        fixed_range_scenario(2.0),
        Box::new(BranchBoundBackend::default()),
    )
}

#[test]
fn central_candidate_serves_the_whole_square() {
    // Four corners, one candidate at the center, all ranges 2, full
    // service required: the solver must build it and allocate everyone.
    let mut model = central_station_model(1.0);
    let range = model.add_locations(&[Point::new(0.5, 0.5)]);
    let mut rng = StdRng::seed_from_u64(100);
    model.add_samples(1, &mut rng).unwrap();
    model.extend_constraints(range.clone());
    model.extend_objective(range);

    let assignment = model.solve(SolveOptions::default()).unwrap();
    assert_eq!(assignment.status, SolveStatus::Optimal);
    assert_eq!(assignment.built, vec![true]);
    assert!(assignment.count[0] >= 1);
    assert_eq!(assignment.alloc[0].len(), 4);
    for i in 0..4 {
        assert!(assignment.alloc[0].contains(&(i, 0)));
    }
}

/// A backend that must never be reached.
struct UnreachableBackend;

impl MilpBackend for UnreachableBackend {
    fn id(&self) -> &str {
        "unreachable"
    }

    fn solve(
        &mut self,
        _model: &ModelBuilder,
        _options: SolveOptions,
        _warm_start: Option<&PartialAssignment>,
    ) -> PlanResult<SolveOutcome> {
        panic!("the feasibility pre-check must fire before any solve");
    }
}

#[test]
fn unreachable_candidates_abort_before_solving() {
    // No vehicle can reach the only candidate, so the matching bound is 0
    // and the infeasibility must surface without invoking the backend.
    let mut planner = LocationPlanner::new(
        unit_square_fleet(),
        CostParams::default(),
        StationParams::with_service_level(1.0).unwrap(),
        fixed_range_scenario(2.0),
        Box::new(UnreachableBackend),
    );
    planner.seed_locations_at(&[Point::new(1000.0, 1000.0)]);

    let config = PlannerConfig {
        samples: 1,
        ..PlannerConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(101);
    let err = planner.solve(&config, &mut rng).unwrap_err();
    assert!(matches!(err, PlanError::Infeasible { .. }));
}

#[test]
fn warm_start_round_trip_never_regresses() {
    // A warm start built for the enlarged model reports a KPI total; the
    // actual solve must do at least as well.
    let mut model = central_station_model(1.0);
    let range = model.add_locations(&[Point::new(0.5, 0.5)]);
    let mut rng = StdRng::seed_from_u64(102);
    model.add_samples(1, &mut rng).unwrap();
    model.extend_constraints(range.clone());
    model.extend_objective(range);
    let first = model.solve(SolveOptions::default()).unwrap();

    // Relocate the built station slightly, the way the improvement step
    // would, and map the old solution onto the enlarged space.
    let added = model.add_locations(&[Point::new(0.5, 0.45)]);
    model.extend_constraints(added.clone());
    model.extend_objective(added.clone());
    let replacements = vec![(0, added.start)];
    let warm = build_warm_start(&model, &first, &replacements, &[]);
    let warm_total = model.warm_start_kpi(KPI_TOTAL, &warm).unwrap();

    model.push_warm_start(warm);
    let second = model.solve(SolveOptions::default()).unwrap();
    assert_eq!(second.status, SolveStatus::Optimal);
    assert!(second.total_cost() <= warm_total + 1e-6);
}

#[test]
fn reachability_columns_grow_monotonically() {
    let mut model = central_station_model(0.5);
    let range = model.add_locations(&[Point::new(0.5, 0.5)]);
    let mut rng = StdRng::seed_from_u64(103);
    model.add_samples(1, &mut rng).unwrap();
    model.extend_constraints(range.clone());
    model.extend_objective(range);

    let before: Vec<bool> = (0..4).map(|i| model.samples()[0].reachable(i, 0)).collect();
    let before_dist: Vec<f64> = (0..4).map(|i| model.samples()[0].distance(i, 0)).collect();

    model.add_locations(&[Point::new(0.2, 0.2), Point::new(5.0, 5.0)]);
    let sample = &model.samples()[0];
    assert_eq!(sample.n_candidates(), 3);
    for i in 0..4 {
        assert_eq!(sample.reachable(i, 0), before[i]);
        assert_eq!(sample.distance(i, 0), before_dist[i]);
    }
}
