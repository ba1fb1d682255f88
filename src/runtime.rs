use anyhow::{Result, bail};
use rayon::ThreadPoolBuilder;
use std::sync::Once;

use crate::config::DriverConfig;

struct ThreadConfig {
    count: usize,
    source: String,
}

fn parse_env_threads(keys: &[&str]) -> Option<ThreadConfig> {
    for &key in keys {
        if let Ok(v) = std::env::var(key) {
            if let Ok(val) = v.parse::<usize>() {
                if val > 0 {
                    return Some(ThreadConfig {
                        count: val,
                        source: key.to_string(),
                    });
                }
            }
        }
    }
    None
}

/// Pool size for `config`: serial runs get one thread, an explicit
/// `threads` wins next, then scheduler hints, then the machine.
fn thread_config(config: &DriverConfig) -> ThreadConfig {
    const ENV_HINTS: [&str; 5] = [
        "RAYON_NUM_THREADS",
        "SLURM_CPUS_PER_TASK",
        "SLURM_CPUS_ON_NODE",
        "PBS_NP",
        "OMP_NUM_THREADS",
    ];

    if !config.parallel {
        return ThreadConfig {
            count: 1,
            source: "parallel=false".to_string(),
        };
    }
    if let Some(count) = config.threads.filter(|&n| n > 0) {
        return ThreadConfig {
            count,
            source: "threads".to_string(),
        };
    }
    if let Some(cfg) = parse_env_threads(&ENV_HINTS) {
        return cfg;
    }

    let fallback = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);

    ThreadConfig {
        count: fallback,
        source: "available_parallelism".to_string(),
    }
}

/// Size the global rayon pool for `config` once per process. Later calls
/// are no-ops.
pub fn configure_thread_pool(config: &DriverConfig) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cfg = thread_config(config);
        match ThreadPoolBuilder::new()
            .num_threads(cfg.count)
            .thread_name(|i| format!("we-bin-{i}"))
            .build_global()
        {
            Ok(_) => {
                tracing::info!(target: "threads", threads = cfg.count, hint = %cfg.source, "rayon pool configured");
            }
            Err(err) => {
                tracing::warn!(target: "threads", %err, "failed to configure rayon pool; continuing with default");
            }
        }
    });
}

// -------------------------------------------------------------------------------------
// Memory budget (HPC safety)
// -------------------------------------------------------------------------------------

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

fn parse_budget_var(var: &str, multiplier: u64) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|v| v.saturating_mul(multiplier))
}

/// Resident-set limit from `WE_MAX_RSS_BYTES`, `WE_MAX_RSS_MB` or
/// `WE_MAX_RSS_GB`, first match wins.
pub fn memory_budget_bytes() -> Option<u64> {
    parse_budget_var("WE_MAX_RSS_BYTES", 1)
        .or_else(|| parse_budget_var("WE_MAX_RSS_MB", MB))
        .or_else(|| parse_budget_var("WE_MAX_RSS_GB", GB))
}

fn current_rss_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut parts = contents.split_whitespace();
    let _total = parts.next()?;
    let resident_pages: u64 = parts.next()?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident_pages.saturating_mul(page_size as u64))
}

fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GB as f64
}

/// Log the resident set after an iteration and fail once it exceeds `budget`.
pub fn check_memory(iteration: u64, budget: Option<u64>) -> Result<()> {
    let Some(rss) = current_rss_bytes() else {
        return Ok(());
    };
    match budget {
        Some(limit) => {
            tracing::debug!(
                target: "mem",
                iteration,
                rss_gib = bytes_to_gib(rss),
                limit_gib = bytes_to_gib(limit)
            );
            if rss > limit {
                bail!(
                    "RSS {:.2} GiB exceeded limit {:.2} GiB (set via WE_MAX_RSS_*)",
                    bytes_to_gib(rss),
                    bytes_to_gib(limit)
                );
            }
        }
        None => {
            tracing::debug!(target: "mem", iteration, rss_gib = bytes_to_gib(rss));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_config_uses_one_thread() {
        let cfg = DriverConfig {
            parallel: false,
            threads: Some(8),
            ..DriverConfig::default()
        };
        assert_eq!(thread_config(&cfg).count, 1);
    }

    #[test]
    fn explicit_thread_count_wins_over_hints() {
        let cfg = DriverConfig {
            threads: Some(3),
            ..DriverConfig::default()
        };
        let tc = thread_config(&cfg);
        assert_eq!(tc.count, 3);
        assert_eq!(tc.source, "threads");
    }
}
