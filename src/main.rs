// SPDX-License-Identifier: Apache-2.0

//! `pflow_engine` -- a small command-line front end over the pipeline
//! graph, metadata allocator, and scheduler crates, enough to build and
//! run a fixed demo pipeline. Wiring an arbitrary pipeline from a control
//! plane (RPC, config file, REPL) is deliberately out of scope; see the
//! crate-level docs in `pflow_graph`.

mod demo;
mod error;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use error::Error;
use pflow_config::EngineConfig;
use pflow_graph::Pipeline;
use pflow_sched::{SystemClock, TaskTable, Worker};

#[derive(Parser)]
#[command(name = "pflow_engine", about = "Packet-processing pipeline engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Builds the bundled source -> bypass -> sink demo pipeline and runs
    /// its single worker for a fixed number of scheduling rounds.
    Run {
        /// Number of `Worker::run_once` rounds to execute.
        #[arg(long, default_value_t = 1000)]
        ticks: u64,
    },
    /// Lists the module classes a freshly built registry knows about.
    Modules,
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { ticks } => run(ticks),
        Command::Modules => {
            for name in demo::registry().class_names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn run(ticks: u64) -> Result<(), Error> {
    let config = EngineConfig::new();
    config.validate()?;

    let registry = demo::registry();
    let mut pipeline = Pipeline::new(config.metadata_region_bytes);

    let src = pipeline.create_module(&registry, "Source", "src")?;
    let mid = pipeline.create_module(&registry, "Bypass", "mid")?;
    let sink = pipeline.create_module(&registry, "Sink", "sink")?;
    pipeline.connect_modules(src, 0, mid, 0)?;
    pipeline.connect_modules(mid, 0, sink, 0)?;
    pipeline.recompute_metadata()?;

    pflow_sched::update_task_graph(&mut pipeline);
    pflow_sched::validate_worker_placement(&pipeline, &[(0, src)], &config.worker_numa_map())?;

    let mut tasks = TaskTable::new();
    let task = tasks.create(src, 0);

    let worker_cfg = config.workers.first().copied().unwrap_or(pflow_config::WorkerConfig::new(0, 0));
    let mut worker = Worker::new(worker_cfg.id, worker_cfg.numa_node, Box::new(SystemClock::new())).expect("worker id within MAX_WORKERS");
    let leaf = worker.scheduler_mut().new_leaf("src-task");
    worker.scheduler_mut().set_root(leaf)?;
    worker.scheduler_mut().attach_task(&mut tasks, leaf, task, None)?;

    let mut rounds_run = 0u64;
    for _ in 0..ticks {
        if worker.run_once(&mut pipeline, &mut tasks) {
            rounds_run += 1;
        }
    }

    tracing::info!(rounds_run, ticks, "worker loop finished");
    println!("ran {rounds_run}/{ticks} scheduling rounds on worker {}", worker.id());
    Ok(())
}
