//! Fly a predefined scenario in-process and report what the monitor did.
//!
//! Usage:
//!   cargo run -p safeflight-cli --bin run_scenario -- --scenario keep-out

use anyhow::Result;
use clap::{Parser, ValueEnum};
use safeflight_cli::sim::scenarios::{
    create_deviation_scenario, create_keep_in_scenario, create_keep_out_scenario,
    create_nominal_scenario, create_traffic_scenario,
};
use safeflight_cli::sim::Simulation;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Available scenarios
#[derive(Debug, Clone, ValueEnum)]
enum ScenarioType {
    /// Straight leg, no conflicts
    Nominal,
    /// Keep-out fence across the leg
    KeepOut,
    /// Head-on intruder
    Traffic,
    /// Crosswind gust off the leg
    Deviation,
    /// Gust out of the keep-in area
    KeepIn,
}

/// In-process flight safety monitor simulation
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Scenario to simulate
    #[arg(long, value_enum, default_value = "keep-out")]
    scenario: ScenarioType,

    /// Simulation step in seconds
    #[arg(long, default_value_t = 0.1)]
    dt: f64,

    /// Override the scenario duration (seconds)
    #[arg(long)]
    duration: Option<f64>,

    /// Seed for the sampling planner
    #[arg(long)]
    seed: Option<u64>,

    /// Print the full summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("safeflight_cli=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut scenario = match args.scenario {
        ScenarioType::Nominal => create_nominal_scenario(),
        ScenarioType::KeepOut => create_keep_out_scenario(),
        ScenarioType::Traffic => create_traffic_scenario(),
        ScenarioType::Deviation => create_deviation_scenario(),
        ScenarioType::KeepIn => create_keep_in_scenario(),
    };
    if let Some(duration) = args.duration {
        scenario.duration_s = duration;
    }

    println!("Scenario: {} - {}", scenario.name, scenario.description);
    let summary = Simulation::new(scenario, args.seed)?.run(args.dt);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Finished in phase {:?} after {:.1}s ({} cycles)",
        summary.final_phase, summary.elapsed_s, summary.cycles
    );
    println!("Peak simultaneous conflicts: {}", summary.peak_conflicts);
    if summary.command_failures > 0 {
        println!("Command failures: {}", summary.command_failures);
    }
    if let Some(sep) = summary.min_traffic_separation_m {
        println!("Closest traffic approach: {:.1} m", sep);
    }
    for event in &summary.resolutions {
        println!("[{:6.1}s] {}", event.time_s, event.kind);
        for (name, length) in &event.candidates {
            println!("           {:<10} {:.1} m", name, length);
        }
    }

    Ok(())
}
