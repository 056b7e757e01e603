use std::path::PathBuf;

use clap::Parser;

use cardgames_bench::config::{BenchConfig, ResolvedOutputs};
use cardgames_bench::logging::init_logging;
use cardgames_bench::runner::BenchRunner;

/// Batch benchmark harness for card-guessing policies.
#[derive(Debug, Parser)]
#[command(
    name = "cardgames-bench",
    author,
    version,
    about = "Deterministic card-guessing benchmark harness"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "bench/bench.yaml")]
    config: PathBuf,

    /// Override the run identifier (substitutes {run_id} templates).
    #[arg(long, value_name = "RUN_ID")]
    run_id: Option<String>,

    /// Override the number of episodes each agent plays.
    #[arg(long, value_name = "RUNS")]
    runs: Option<usize>,

    /// Override the master seed episode seeds are drawn from.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Exit after validating the configuration (no episodes are played).
    #[arg(long)]
    validate_only: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = BenchConfig::from_path(&cli.config)?;

    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }

    if let Some(runs) = cli.runs {
        config.episodes.runs = runs;
    }

    if let Some(seed) = cli.seed {
        config.episodes.seed = Some(seed);
    }

    config.validate()?;

    let outputs: ResolvedOutputs = config.resolved_outputs();
    let agent_count = config.agents.len();
    let run_id = config.run_id.clone();
    let runs = config.episodes.runs;
    let n_decks = config.game.n_decks;

    println!(
        "Loaded configuration '{run_id}' with {agent_count} agent{} ({runs} episodes, {n_decks} deck{})",
        if agent_count == 1 { "" } else { "s" },
        if n_decks == 1 { "" } else { "s" }
    );

    let _logging_guard = if cli.validate_only {
        None
    } else {
        init_logging(&config.logging, &outputs)?
    };
    let runner = BenchRunner::new(config, outputs)?;

    if cli.validate_only {
        println!("Validation-only mode: benchmark execution skipped.");
        return Ok(());
    }

    let summary = runner.run()?;
    println!(
        "Benchmark complete for '{run_id}': {} agents × {} episodes → {} rows at {}",
        summary.agents,
        summary.episodes,
        summary.rows_written,
        summary.jsonl_path.display()
    );
    println!("Summary table: {}", summary.summary_path.display());
    if let Some(plot_path) = summary.plot_path.as_ref() {
        println!("Mean reward plot: {}", plot_path.display());
    }
    if let Some(plot_path) = summary.distribution_plot_path.as_ref() {
        println!("Deck distribution plot: {}", plot_path.display());
    }
    if let Some(telemetry_path) = summary.telemetry_path.as_ref() {
        println!("Telemetry log: {}", telemetry_path.display());
    }
    for failure in &summary.failures {
        println!(
            "Agent '{}' stopped at episode {}: {}",
            failure.agent, failure.episode_index, failure.message
        );
    }

    Ok(())
}
