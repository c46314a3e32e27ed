use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use evsite_core::constants::{QUEUE_SIZE, STATION_CAPACITY};
use evsite_core::{CostParams, Fleet, Point, StationParams};
use evsite_solve::milp::BranchBoundBackend;
use evsite_solve::planner::{
    IterationSnapshot, LocationPlanner, PlanOutcome, PlannerConfig, ProgressObserver, SeedMode,
};
use evsite_solve::{AllocationEvaluator, EvaluationConfig, ScenarioParams};

mod cli;
use cli::{Cli, Commands, EvaluateArgs, PlanArgs, SeedArg};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install logger")?;

    match cli.command {
        Commands::Plan(args) => run_plan(args),
        Commands::Evaluate(args) => run_evaluate(args),
    }
}

/// Logs one line per outer iteration.
struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_iteration(&mut self, snapshot: &IterationSnapshot<'_>) {
        info!(
            iteration = snapshot.iteration,
            objective = snapshot.assignment.objective,
            built = snapshot.assignment.n_built(),
            candidates = snapshot.candidates.len(),
            "iteration finished"
        );
    }
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let fleet = read_fleet(&args.fleet)?;
    info!(vehicles = fleet.len(), "fleet loaded");

    let station = StationParams::new(
        STATION_CAPACITY,
        QUEUE_SIZE,
        args.service_level,
        args.fixed_stations,
    )?;
    let mut planner = LocationPlanner::new(
        fleet,
        CostParams::default(),
        station,
        ScenarioParams::default(),
        Box::new(BranchBoundBackend::default()),
    );
    planner.set_observer(Box::new(LogObserver));

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mode = match args.seed_mode {
        SeedArg::Random => SeedMode::UniformRandom,
        SeedArg::KMeans => SeedMode::KMeans,
    };
    planner.seed_locations(args.stations, mode, &mut rng)?;

    let config = PlannerConfig {
        samples: args.samples,
        time_limit: Some(Duration::from_secs_f64(args.time_limit)),
        max_iterations: args.max_iterations,
        ..PlannerConfig::default()
    };
    let outcome = planner.solve(&config, &mut rng)?;

    info!(
        built = outcome.built_locations.len(),
        chargers = outcome.charger_counts.iter().sum::<u32>(),
        iterations = outcome.iterations,
        objective = outcome.final_assignment.objective,
        gap_rel = outcome.gap_rel,
        "plan finished"
    );
    write_json(&outcome, args.out.as_deref())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let fleet = read_fleet(&args.fleet)?;
    let text = fs::read_to_string(&args.plan)
        .with_context(|| format!("failed to read plan {}", args.plan.display()))?;
    let plan: PlanOutcome = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse plan {}", args.plan.display()))?;

    let mut evaluator = AllocationEvaluator::new(
        plan.built_locations,
        plan.charger_counts,
        CostParams::default(),
        Box::new(BranchBoundBackend::default()),
    )?;
    let config = EvaluationConfig {
        iterations: args.iterations,
        service_level: args.service_level,
        time_limit: Some(Duration::from_secs_f64(args.time_limit)),
        scenario: ScenarioParams::default(),
    };
    let mut rng = StdRng::seed_from_u64(args.seed);
    let report = evaluator.evaluate(&fleet, &config, &mut rng)?;

    info!(
        feasible = report.n_feasible(),
        total = report.records.len(),
        "evaluation finished"
    );
    if let Some(mean) = report.mean_objective_feasible() {
        info!(mean_objective = mean, "draws meeting the nominal service level");
    }
    if let Some(mean) = report.mean_objective_infeasible() {
        info!(
            mean_objective = mean,
            mean_service_level = report.mean_service_level_infeasible().unwrap_or(0.0),
            "draws below the nominal service level"
        );
    }
    write_json(&report, args.out.as_deref())
}

/// Read a fleet from `x,y` CSV rows; a non-numeric first row is treated as
/// a header.
fn read_fleet(path: &Path) -> Result<Fleet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open fleet file {}", path.display()))?;

    let mut points = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        match parse_point(&record) {
            Ok(p) => points.push(p),
            Err(_) if row == 0 => continue,
            Err(e) => return Err(e).with_context(|| format!("fleet row {}", row + 1)),
        }
    }
    Ok(Fleet::new(points)?)
}

fn parse_point(record: &csv::StringRecord) -> Result<Point> {
    let x: f64 = record
        .get(0)
        .context("missing x column")?
        .parse()
        .context("x is not a number")?;
    let y: f64 = record
        .get(1)
        .context("missing y column")?
        .parse()
        .context("y is not a number")?;
    Ok(Point::new(x, y))
}

fn write_json<T: serde::Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "output written");
        }
        None => println!("{json}"),
    }
    Ok(())
}
