use rayon::ThreadPoolBuilder;
use std::sync::Once;
use tracing::{info, warn};

use crate::config::GB;
use crate::error::{CountError, Result};

// -------------------------------------------------------------------------------------
// Worker pool
// -------------------------------------------------------------------------------------

struct ThreadConfig {
    count: usize,
    source: String,
}

fn parse_env_threads(keys: &[&str]) -> Option<ThreadConfig> {
    for &key in keys {
        if let Ok(v) = std::env::var(key) {
            if let Ok(val) = v.trim().parse::<usize>() {
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

fn detect_thread_config() -> ThreadConfig {
    const ENV_HINTS: [&str; 3] = ["ADDRCOUNT_THREADS", "RAYON_NUM_THREADS", "OMP_NUM_THREADS"];

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

/// Install the global rayon pool used for shard workers. Idempotent.
pub fn configure_thread_pool() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cfg = detect_thread_config();
        match ThreadPoolBuilder::new()
            .num_threads(cfg.count)
            .thread_name(|i| format!("addrcount-worker-{i}"))
            .build_global()
        {
            Ok(_) => info!(threads = cfg.count, hint = %cfg.source, "rayon pool configured"),
            Err(err) => warn!(%err, "failed to configure rayon pool; continuing with default"),
        }
    });
}

// -------------------------------------------------------------------------------------
// Memory tracking
// -------------------------------------------------------------------------------------

/// Resident set size from `/proc/self/statm`; `None` off Linux.
pub fn current_rss_bytes() -> Option<u64> {
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

pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GB as f64
}

/// Log RSS after `stage`; error if it is above `budget`.
pub fn check_memory(stage: &str, budget: Option<u64>) -> Result<()> {
    let Some(rss) = current_rss_bytes() else {
        return Ok(());
    };
    match budget {
        Some(limit) => {
            info!(
                stage,
                rss_gib = bytes_to_gib(rss),
                limit_gib = bytes_to_gib(limit),
                "memory"
            );
            if rss > limit {
                return Err(CountError::MemoryCeiling { rss, limit });
            }
        }
        None => info!(stage, rss_gib = bytes_to_gib(rss), "memory"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generous_budget_passes() {
        assert!(check_memory("test", Some(u64::MAX)).is_ok());
        assert!(check_memory("test", None).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn tiny_budget_trips() {
        let err = check_memory("test", Some(1)).unwrap_err();
        assert!(matches!(err, CountError::MemoryCeiling { limit: 1, .. }));
    }
}
