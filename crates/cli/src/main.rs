//! eventflow CLI - resolve plans, inspect sequences and process events.

mod options;
mod units;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use eventflow_core::{Composite, DataKey};
use eventflow_execution::{ControlFlowSequence, DependencyResolver, ExecutionEngine, Member};
use options::JobOptions;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eventflow")]
#[command(about = "Event-processing scheduler", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the execution plan producing the given data keys
    Plan {
        /// Job options file
        #[arg(long)]
        options: PathBuf,
        /// Data key to produce (repeatable)
        #[arg(long = "output", required = true)]
        outputs: Vec<String>,
        /// Unit whose inputs are not expanded (repeatable)
        #[arg(long = "stopper")]
        stoppers: Vec<String>,
    },
    /// Show the configured sequences
    Show {
        /// Job options file
        #[arg(long)]
        options: PathBuf,
    },
    /// Process events through the top-level units
    Run {
        /// Job options file
        #[arg(long)]
        options: PathBuf,
        /// Number of events
        #[arg(long, default_value = "10")]
        events: u64,
        /// Events processed in parallel
        #[arg(long)]
        threads: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Plan {
            options,
            outputs,
            stoppers,
        } => {
            let options = JobOptions::load(&options)?;
            let job = options.build()?;
            let resolver = DependencyResolver::new(Arc::clone(&job.catalogue), &options.resolver)?;

            let keys: BTreeSet<DataKey> = outputs.into_iter().map(DataKey::new).collect();
            let stoppers: HashSet<String> = stoppers.into_iter().collect();
            let plan = resolver.resolve(&keys, &stoppers)?;

            println!("Execution plan ({} units)", plan.len());
            for (i, unit) in plan.iter().enumerate() {
                let marker = if stoppers.contains(unit.name()) { " [stopper]" } else { "" };
                println!("  {:>2}. {}{}", i + 1, unit.type_and_name(), marker);
            }
            resolver.finalize();
        }
        Commands::Show { options } => {
            let job = JobOptions::load(&options)?.build()?;

            if job.sequences.is_empty() {
                println!("No sequences configured");
            }
            for sequence in &job.sequences {
                println!("{}/{}", ControlFlowSequence::TYPE, sequence.name());
                println!("  Control flow: {}", sequence.control_flow_expression());
                if sequence.stop_override() {
                    println!("  StopOverride: true");
                }
                print_members("Members", &sequence.members());
                print_members("Branch", &sequence.branch_members());
            }
        }
        Commands::Run {
            options,
            events,
            threads,
        } => {
            let options = JobOptions::load(&options)?;
            let job = options.build()?;

            let mut config = options.engine.clone();
            config.top_units = options.top_units();
            if let Some(threads) = threads {
                config.concurrent_events = threads;
            }
            if config.top_units.is_empty() {
                bail!("nothing to run: configure engine.top_units or declare a sequence");
            }

            let engine = ExecutionEngine::new(job.catalogue, config)?;
            engine.initialize_all()?;
            engine.start_all()?;
            let result = engine.run(events);

            if let Err(e) = engine.stop_all().and_then(|_| engine.finalize_all()) {
                warn!("Shutdown failed: {}", e);
            }
            let report = result?;

            info!("Run finished in {}ms", report.duration().num_milliseconds());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn print_members(label: &str, members: &[Member]) {
    if members.is_empty() {
        return;
    }
    println!("  {}:", label);
    for member in members {
        let invert = if member.invert() { " (inverted)" } else { "" };
        println!("    - {}{}", member.unit().type_and_name(), invert);
    }
}
