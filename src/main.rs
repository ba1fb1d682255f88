use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use weresample::config::DriverConfig;
use weresample::mapping::RectilinearBinMapper;
use weresample::population::{
    InitialState, InitialStatePool, Parent, PolicyRegistry, SegmentStore, SinkRegion, VecPool, WeDriver,
};
use weresample::sim::{BrownianPropagator, Propagator};
use weresample::{io, runtime};

/// Walkers per bin in the toy system.
const TARGET_PER_BIN: usize = 4;
/// Walkers reaching this coordinate are recycled to the origin.
const SINK_AT: f64 = 5.0;

enum RunMode {
    Fresh {
        iterations: u64,
        snapshot_out: PathBuf,
    },
    Resume {
        snapshot: PathBuf,
        iterations: u64,
    },
}

fn usage() -> ! {
    eprintln!(
        "usage: weresample <iterations> [snapshot_out.npz]\n       weresample --resume <snapshot.npz> <iterations>"
    );
    std::process::exit(1);
}

/// Initial states available for recycling. Tunable via `WE_POOL_SIZE`.
fn pool_size() -> usize {
    env::var("WE_POOL_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000)
}

fn parse_iterations(raw: &str) -> Result<u64> {
    raw.parse()
        .with_context(|| format!("iteration count {raw:?} is not a number"))
}

fn parse_args() -> Result<RunMode> {
    let mut args = env::args().skip(1);
    let first = args.next().unwrap_or_else(|| usage());
    if first == "--resume" {
        let snap = args.next().unwrap_or_else(|| usage());
        let iterations = parse_iterations(&args.next().unwrap_or_else(|| usage()))?;
        let snapshot = PathBuf::from(snap);
        if !snapshot.exists() {
            bail!("snapshot {:?} does not exist", snapshot);
        }
        return Ok(RunMode::Resume { snapshot, iterations });
    }

    let iterations = parse_iterations(&first)?;
    let snapshot_out = if let Some(explicit) = args.next() {
        PathBuf::from(explicit)
    } else if let Ok(from_env) = env::var("WE_SNAPSHOT_PATH") {
        PathBuf::from(from_env)
    } else {
        PathBuf::from("weresample_snapshot.npz")
    };
    Ok(RunMode::Fresh {
        iterations,
        snapshot_out,
    })
}

/// 1-D grid from just below the origin up to the sink, open at both ends.
fn toy_driver(config: DriverConfig) -> Result<WeDriver> {
    let mut edges = vec![f64::NEG_INFINITY];
    edges.extend((0..10).map(|k| k as f64 * SINK_AT / 10.0));
    edges.push(f64::INFINITY);
    let mapper = RectilinearBinMapper::new(vec![edges])?;
    let targets = vec![TARGET_PER_BIN; 11];
    let sinks = vec![SinkRegion::new("target", vec![SINK_AT], vec![f64::INFINITY])];
    Ok(WeDriver::new(
        config,
        Box::new(mapper),
        targets,
        sinks,
        &PolicyRegistry::default(),
    )?)
}

fn origin_pool(first_id: u64) -> VecPool {
    VecPool::new((0..pool_size() as u64).map(|i| InitialState {
        id: first_id + i,
        pcoord: vec![0.0],
    }))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let mode = parse_args()?;
    let config = DriverConfig::from_env().context("driver configuration")?;
    runtime::configure_thread_pool(&config);
    let mem_budget = runtime::memory_budget_bytes();
    let mut propagator = BrownianPropagator {
        seed: config.rng_seed,
        ..BrownianPropagator::default()
    };
    let mut driver = toy_driver(config)?;

    let (mut store, mut pool, iterations, snapshot_out) = match mode {
        RunMode::Resume {
            snapshot,
            iterations,
        } => {
            tracing::info!(target: "resume", path = %snapshot.display(), "loading snapshot");
            let store = io::load_store(&snapshot.to_string_lossy())?;
            // keep initial-state ids unique across restarts
            let used = store
                .current
                .iter()
                .filter_map(|s| match s.parent {
                    Some(Parent::InitialState(id)) => Some(id + 1),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            (store, origin_pool(used), iterations, snapshot)
        }
        RunMode::Fresh {
            iterations,
            snapshot_out,
        } => {
            let mut pool = origin_pool(0);
            let states: Vec<InitialState> = (0..TARGET_PER_BIN).filter_map(|_| pool.take()).collect();
            if states.is_empty() {
                bail!("WE_POOL_SIZE leaves no initial states");
            }
            let weights = vec![1.0 / states.len() as f64; states.len()];
            let mut store = SegmentStore::new();
            driver.populate_initial(&mut store, &states, &weights)?;
            (store, pool, iterations, snapshot_out)
        }
    };

    let pb = ProgressBar::new(iterations);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} iterations {msg}")?
            .progress_chars("=>-"),
    );

    let mut recycled_weight = 0.0;
    for _ in 0..iterations {
        propagator.propagate(store.iteration, &mut store.current)?;
        let report = driver.construct_next(&mut store, &mut pool)?;
        recycled_weight += report.recycled.iter().map(|r| r.weight).sum::<f64>();
        store.advance()?;
        pb.set_message(format!(
            "iter={} walkers={} pool={}",
            store.iteration,
            store.current.len(),
            pool.available()
        ));
        pb.inc(1);
        runtime::check_memory(store.iteration, mem_budget)?;
    }
    pb.finish();
    tracing::info!(
        iteration = store.iteration,
        walkers = store.current.len(),
        recycled_weight,
        "run complete"
    );

    if let Some(parent) = snapshot_out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
        }
    }
    io::save_store(&snapshot_out.to_string_lossy(), &store)?;
    tracing::info!(target: "snapshot", path = %snapshot_out.display(), "store saved");
    Ok(())
}
