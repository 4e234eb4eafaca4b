use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use csma_sim::simulation::{Scenario, SimStats, SimWorld};

#[derive(Parser)]
#[command(name = "csma_sim")]
#[command(about = "Headless CSMA/CA shared-channel simulation")]
struct Cli {
    /// Number of simulation ticks to run
    #[arg(long, default_value = "3000")]
    ticks: u32,

    /// Time delta per tick in milliseconds
    #[arg(long, default_value = "16.0")]
    delta: f64,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// TOML scenario to load instead of the built-in demo world
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Log a world summary every N ticks (0 disables)
    #[arg(long, default_value = "500")]
    report_every: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    ensure!(
        cli.delta.is_finite() && cli.delta > 0.0,
        "--delta must be a positive number of milliseconds, got {}",
        cli.delta
    );

    let world = build_world(&cli)?;
    run_headless(world, cli.ticks, cli.delta, cli.report_every);
    Ok(())
}

fn build_world(cli: &Cli) -> Result<SimWorld> {
    match &cli.scenario {
        Some(path) => {
            let scenario = Scenario::load(path)
                .with_context(|| format!("could not read scenario {}", path.display()))?;
            scenario
                .build(cli.seed)
                .with_context(|| format!("invalid scenario {}", path.display()))
        }
        None => Ok(match cli.seed {
            Some(seed) => SimWorld::create_demo_world_with_seed(seed),
            None => SimWorld::create_demo_world(),
        }),
    }
}

/// Run the simulation without any presentation layer
fn run_headless(mut world: SimWorld, ticks: u32, delta: f64, report_every: u32) {
    info!("Running channel simulation in headless mode...");
    info!(
        "Ticks: {}, Delta: {}ms, Terminals: {}",
        ticks,
        delta,
        world.terminal_count()
    );

    world.log_summary();

    for tick in 1..=ticks {
        world.tick(delta);

        if report_every > 0 && tick % report_every == 0 && tick < ticks {
            info!("--- After tick {} ({:.1}s simulated time) ---", tick, world.time / 1000.0);
            world.log_summary();
        }
    }

    world.log_summary();

    let totals = world.totals();
    info!("=== SIMULATION COMPLETE ===");
    info!("Elapsed time: {:.1}s", world.time / 1000.0);
    info!(
        "Broadcasts emitted: {} (RTS {}, CTS {}, DATA {}, ACK {})",
        world.stats.total_emitted(),
        world.stats.rts_emitted,
        world.stats.cts_emitted,
        world.stats.data_emitted,
        world.stats.ack_emitted
    );
    info!(
        "Collisions: {} ({} overlapping pairs, {} at busy receivers)",
        totals.collisions, world.stats.overlaps, world.stats.receiver_collisions
    );
    info!("Data delivered: {}", totals.data_delivered);
    info!(
        "Data abandoned: {} (RTS abandoned: {})",
        totals.data_abandoned, totals.rts_abandoned
    );
    info!("Delivery rate: {:.1}%", SimStats::delivery_rate(&totals));
}
