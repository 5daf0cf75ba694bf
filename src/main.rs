//! shardjoin CLI - fork-join demonstrations on top of the harness

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shardjoin::{Harness, HarnessConfig, ReportError, SyncReporter, CACHE_LINE_BYTES};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardjoin")]
#[command(about = "Partitioned fork-join demonstrations", long_about = None)]
struct Cli {
    /// Worker count (defaults to available parallelism, or 4)
    #[arg(long, global = true, env = "SHARDJOIN_WORKERS")]
    workers: Option<usize>,

    /// Alignment boundary for shard starts, in bytes
    #[arg(long, global = true, env = "SHARDJOIN_ALIGN_BYTES", default_value_t = CACHE_LINE_BYTES)]
    align_bytes: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Independent per-task counters, printed through one shared channel
    Counters {
        /// Increments performed by each task
        #[arg(long, default_value = "1000")]
        iterations: usize,
    },
    /// Fill a buffer with random values, single-threaded then partitioned
    Fill {
        /// Number of u32 elements in the buffer
        #[arg(long, default_value = "100000000")]
        len: usize,
        /// Base seed; each task seeds from base + task index. Omit for entropy.
        #[arg(long)]
        seed: Option<u64>,
        /// Print the shard plan before running
        #[arg(long)]
        show_plan: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = HarnessConfig::default().with_alignment_bytes(cli.align_bytes);
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    let harness = Harness::new(config);

    match cli.command {
        Commands::Counters { iterations } => counters(&harness, iterations),
        Commands::Fill {
            len,
            seed,
            show_plan,
        } => fill(&harness, len, seed, show_plan),
    }
}

fn counters(harness: &Harness, iterations: usize) -> Result<()> {
    let workers = harness.config().workers;
    let reporter = SyncReporter::stdout();

    let n = counter_range(workers, iterations)?;

    let batch = harness
        .run_ranges(
            n,
            |task| (task, 0u64),
            |shard, (task, mut counter)| {
                for _ in shard.indices() {
                    counter += 1;
                }
                reporter.report(task, counter)?;
                Ok::<_, ReportError>(counter)
            },
        )
        .context("counter batch failed")?;

    info!(
        tasks = batch.len(),
        elapsed_ms = batch.elapsed_millis() as u64,
        "counters finished"
    );
    Ok(())
}

/// Length of the counted range: `iterations` per worker
fn counter_range(workers: usize, iterations: usize) -> Result<usize> {
    workers.checked_mul(iterations).with_context(|| {
        format!(
            "{} workers x {} iterations overflows usize",
            workers, iterations
        )
    })
}

fn task_rng(seed: Option<u64>, task: usize) -> StdRng {
    match seed {
        Some(base) => StdRng::seed_from_u64(base.wrapping_add(task as u64)),
        None => StdRng::from_entropy(),
    }
}

fn fill(harness: &Harness, len: usize, seed: Option<u64>, show_plan: bool) -> Result<()> {
    let mut buf = vec![0u32; len];

    if show_plan {
        print!("{}", harness.plan::<u32>(len)?);
    }

    let serial = harness
        .run_serial(
            &mut buf,
            |task| task_rng(seed, task),
            |_, chunk, mut rng| {
                rng.fill(chunk);
                Ok::<_, std::convert::Infallible>(())
            },
        )
        .context("single-threaded fill failed")?;
    println!("Single-threaded: {} ms", serial.elapsed_millis());

    let parallel = harness
        .run_slice(
            &mut buf,
            |task| task_rng(seed, task),
            |_, chunk, mut rng| {
                rng.fill(chunk);
                Ok::<_, std::convert::Infallible>(())
            },
        )
        .context("multi-threaded fill failed")?;
    println!(
        "Multi-threaded ({} workers): {} ms",
        parallel.len(),
        parallel.elapsed_millis()
    );

    info!(
        len,
        serial_ms = serial.elapsed_millis() as u64,
        parallel_ms = parallel.elapsed_millis() as u64,
        "fill finished"
    );
    Ok(())
}
