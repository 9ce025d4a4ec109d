use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use spillway_core::{load_dotenv, CompletionMode, DrainPolicy, PreSplit, SpillwayConfig};
use spillway_scheduler::HybridScheduler;
use spillway_uts::stats::performance_line;
use spillway_uts::{register_functions, sequential_count, TaskManager};
use spillway_wire::FunctionRegistry;

/// Unbalanced tree search over local workers and remote functions.
#[derive(Parser, Debug)]
#[command(name = "uts", about = "Unbalanced tree search on the spillway hybrid scheduler")]
struct Args {
    /// Tree depth
    #[arg(short, long)]
    depth: Option<u32>,

    /// Root seed
    #[arg(long)]
    seed: Option<u32>,

    /// Local worker threads (0 = available parallelism)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum concurrent remote invocations
    #[arg(long)]
    remote_pool: Option<usize>,

    /// Bags per wave
    #[arg(long)]
    parallelism: Option<usize>,

    /// Expansions per bag per wave
    #[arg(long)]
    iterations: Option<u64>,

    /// Drain up to N completed bags before redispatching
    #[arg(long, value_name = "N")]
    poll: Option<usize>,

    /// Run shallow local rounds before the first wave
    #[arg(long)]
    presplit: bool,

    /// Block on the completion queue instead of polling it
    #[arg(long)]
    blocking: bool,

    /// Remote functions: in-process, tcp://host:port or ipc://name
    #[arg(long)]
    endpoint: Option<String>,

    /// Path to spillway.toml
    #[arg(long, env = "SPILLWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Run a throwaway search at this depth first
    #[arg(long)]
    warmup_depth: Option<u32>,

    /// Count the tree on this thread, without the scheduler
    #[arg(long)]
    sequential: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut SpillwayConfig) {
        let manager = &mut config.manager;
        if let Some(depth) = self.depth {
            manager.depth = depth;
        }
        if let Some(seed) = self.seed {
            manager.seed = seed;
        }
        if let Some(parallelism) = self.parallelism {
            manager.parallelism = parallelism;
        }
        if let Some(iterations) = self.iterations {
            manager.iterations_per_wave = iterations;
        }
        if let Some(n) = self.poll {
            manager.drain = DrainPolicy::Poll { n };
        }
        if self.presplit && manager.presplit.is_none() {
            manager.presplit = Some(PreSplit::default());
        }
        if self.blocking {
            manager.completion = CompletionMode::Blocking;
        }
        if let Some(workers) = self.workers {
            config.scheduler.local_workers = workers;
        }
        if let Some(pool) = self.remote_pool {
            config.scheduler.remote_pool_size = pool;
        }
        if let Some(endpoint) = &self.endpoint {
            config.remote.endpoint = endpoint.clone();
        }
    }
}

fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => SpillwayConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SpillwayConfig::from_env().context("failed to read configuration")?,
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;
    config.log_summary();

    if args.sequential {
        let depth = config.manager.depth;
        println!("Starting...");
        let started = Instant::now();
        let total = sequential_count(config.manager.seed, depth);
        println!("Finished.");
        println!("{}", performance_line(depth, total, started.elapsed()));
        return Ok(());
    }

    let mut registry = FunctionRegistry::new();
    register_functions(&mut registry)?;
    let scheduler =
        HybridScheduler::from_config(&config, registry).context("failed to start scheduler")?;

    let result = search(&scheduler, &config, &args);
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "search failed");
    }
    scheduler.shutdown();
    result
}

fn search(scheduler: &HybridScheduler, config: &SpillwayConfig, args: &Args) -> Result<()> {
    if let Some(depth) = args.warmup_depth {
        let mut warmup = config.manager.clone();
        warmup.depth = depth;
        let report = TaskManager::new(scheduler, warmup)?.run()?;
        info!(depth, total = report.total, "warmup finished");
        scheduler.reset_cost_report();
    }

    println!("Starting...");
    let report = TaskManager::new(scheduler, config.manager.clone())?.run()?;
    println!("Finished.");

    println!("{}", performance_line(config.manager.depth, report.total, report.elapsed));
    println!("{}", scheduler.cost_report());
    println!(
        "Actual compute time: {} ms",
        report.actual_compute_time().as_millis()
    );
    if let Some(path) = report.critical_path_delay() {
        println!("Critical path delay: {} ms", path.total);
    }
    if report.failed > 0 {
        println!("Failed wave items: {} (their bags were not counted)", report.failed);
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
