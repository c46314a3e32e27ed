//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "evsite",
    version,
    about = "Charging-network placement planner"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the placement heuristic and write the resulting plan
    Plan(PlanArgs),
    /// Stress-test a finalized plan against fresh demand draws
    Evaluate(EvaluateArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SeedArg {
    /// Uniform random locations over the fleet bounding box
    Random,
    /// K-means cluster centers of the fleet
    KMeans,
}

#[derive(Args)]
pub struct PlanArgs {
    /// CSV file of vehicle positions, one `x,y` row per vehicle
    #[arg(long)]
    pub fleet: PathBuf,

    /// Number of initial candidate locations
    #[arg(long, default_value_t = 10)]
    pub stations: usize,

    /// Initial candidate seeding mode
    #[arg(long, value_enum, default_value_t = SeedArg::Random)]
    pub seed_mode: SeedArg,

    /// Demand samples the model optimizes over
    #[arg(long, default_value_t = 5)]
    pub samples: usize,

    /// Minimum fraction of vehicles that must be served, in (0, 1]
    #[arg(long, default_value_t = 0.95)]
    pub service_level: f64,

    /// Build exactly this many stations
    #[arg(long)]
    pub fixed_stations: Option<usize>,

    /// RNG seed for reproducible runs
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Wall-clock limit per solve call (seconds)
    #[arg(long, default_value_t = 10.0)]
    pub time_limit: f64,

    /// Cap on outer improvement iterations
    #[arg(long, default_value_t = 50)]
    pub max_iterations: usize,

    /// Output JSON path (stdout when omitted)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct EvaluateArgs {
    /// Plan JSON produced by `evsite plan`
    #[arg(long)]
    pub plan: PathBuf,

    /// CSV file of vehicle positions, one `x,y` row per vehicle
    #[arg(long)]
    pub fleet: PathBuf,

    /// Number of Monte-Carlo demand draws
    #[arg(long, default_value_t = 50)]
    pub iterations: usize,

    /// Nominal service-level target, in (0, 1]
    #[arg(long, default_value_t = 0.95)]
    pub service_level: f64,

    /// RNG seed for reproducible draws
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Wall-clock limit per allocation solve (seconds)
    #[arg(long, default_value_t = 60.0)]
    pub time_limit: f64,

    /// Output JSON path (stdout when omitted)
    #[arg(long)]
    pub out: Option<PathBuf>,
}
