use anyhow::Context;
use clap::Parser;
use log::LevelFilter;

use workflow_sim_core::domain::scenario::JobReport;
use workflow_sim_core::domain::simulator::simulator::TokioSimulator;
use workflow_sim_core::{load_scenario, logger};

/// Runs one standard job scenario in simulated time.
#[derive(Parser, Debug)]
#[command(name = "workflow-sim", version)]
struct Args {
    /// Path to the scenario JSON file.
    #[arg(short, long)]
    scenario: String,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        logger::init_with_level(LevelFilter::Debug);
    } else {
        logger::init();
    }

    // Paused clock: the runtime skips straight to the next timer whenever
    // every actor is waiting, which makes time purely simulated.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .context("failed to build the simulation runtime")?;

    let report = runtime
        .block_on(async {
            let scenario = load_scenario(&args.scenario, TokioSimulator::shared())?;
            scenario.run().await
        })
        .with_context(|| format!("scenario '{}' could not be run", args.scenario))?;

    match &report.outcome {
        JobReport::Completed => println!("{} completed in {:.3}s", report.job, report.makespan),
        JobReport::Failed { cause } => println!("{} failed after {:.3}s: {}", report.job, report.makespan, cause),
    }
    for task in &report.tasks {
        println!(
            "  {:<20} {:<10} host={:<10} cores={:<3} start={:<10} end={}",
            task.id.to_string(),
            format!("{:?}", task.state),
            task.host.as_ref().map(|h| h.to_string()).unwrap_or_else(|| "-".to_string()),
            task.num_cores,
            task.start_date.map(|d| format!("{:.3}", d)).unwrap_or_else(|| "-".to_string()),
            task.end_date.map(|d| format!("{:.3}", d)).unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}
