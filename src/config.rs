use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub use crate::address::ParsePolicy;

pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;
pub const GB: u64 = MB * 1024;

/// Inputs at or below this size are counted with a single in-memory set.
pub const DEFAULT_SIZE_THRESHOLD_BYTES: u64 = 50 * MB;
/// Input bytes per shard; bounds the size of each shard's set.
pub const DEFAULT_BYTES_PER_SHARD: u64 = 350 * MB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Pick by input size against `size_threshold_bytes`.
    #[default]
    Auto,
    Exact,
    /// `None` derives the shard count from the input size.
    Sharded { shards: Option<usize> },
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "auto" => return Ok(Strategy::Auto),
            "exact" => return Ok(Strategy::Exact),
            "sharded" => return Ok(Strategy::Sharded { shards: None }),
            _ => {}
        }
        if let Some(n) = s.strip_prefix("sharded:") {
            return match n.parse::<usize>() {
                Ok(v) if v > 0 => Ok(Strategy::Sharded { shards: Some(v) }),
                _ => Err(format!("bad shard count in strategy: {s}")),
            };
        }
        Err(format!("unknown strategy: {s}"))
    }
}

#[derive(Debug, Clone)]
pub struct CountOptions {
    pub size_threshold_bytes: u64,
    pub bytes_per_shard: u64,
    pub strategy: Strategy,
    pub policy: ParsePolicy,
    /// Parent for the per-run shard directory; system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
    pub progress: bool,
    /// Fail the sharded path if RSS grows past this after a shard is counted.
    pub max_rss_bytes: Option<u64>,
    /// Wall-clock limit for the whole sharded path (partition + fan-out).
    pub sharded_timeout: Option<Duration>,
}

impl Default for CountOptions {
    fn default() -> Self {
        Self {
            size_threshold_bytes: DEFAULT_SIZE_THRESHOLD_BYTES,
            bytes_per_shard: DEFAULT_BYTES_PER_SHARD,
            strategy: Strategy::Auto,
            policy: ParsePolicy::Strict,
            temp_dir: None,
            progress: false,
            max_rss_bytes: None,
            sharded_timeout: None,
        }
    }
}

fn env_nonempty(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn env_parse<T>(var: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_nonempty(var)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(err) => {
            warn!(var, value = %raw, %err, "ignoring unparsable override");
            None
        }
    }
}

fn env_positive_u64(var: &str) -> Option<u64> {
    match env_parse::<u64>(var)? {
        0 => {
            warn!(var, "ignoring zero-valued override");
            None
        }
        v => Some(v),
    }
}

fn env_budget() -> Option<u64> {
    env_positive_u64("ADDRCOUNT_MAX_RSS_BYTES")
        .or_else(|| env_positive_u64("ADDRCOUNT_MAX_RSS_MB").map(|v| v.saturating_mul(MB)))
        .or_else(|| env_positive_u64("ADDRCOUNT_MAX_RSS_GB").map(|v| v.saturating_mul(GB)))
}

impl CountOptions {
    /// Defaults with `ADDRCOUNT_*` environment overrides layered on top.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(v) = env_positive_u64("ADDRCOUNT_SIZE_THRESHOLD_BYTES") {
            opts.size_threshold_bytes = v;
        }
        if let Some(v) = env_positive_u64("ADDRCOUNT_BYTES_PER_SHARD") {
            opts.bytes_per_shard = v;
        }
        if let Some(v) = env_parse::<Strategy>("ADDRCOUNT_STRATEGY") {
            opts.strategy = v;
        }
        if let Some(v) = env_parse::<ParsePolicy>("ADDRCOUNT_POLICY") {
            opts.policy = v;
        }
        if let Some(dir) = env_nonempty("ADDRCOUNT_TMPDIR") {
            opts.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = env_nonempty("ADDRCOUNT_PROGRESS") {
            opts.progress = matches!(v.as_str(), "1" | "true" | "yes" | "on");
        }
        opts.max_rss_bytes = env_budget();
        opts.sharded_timeout = env_positive_u64("ADDRCOUNT_TIMEOUT_SECS").map(Duration::from_secs);
        opts
    }

    /// `size / bytes_per_shard + 1`, never zero.
    pub fn shard_count_for(&self, size: u64) -> usize {
        let per = self.bytes_per_shard.max(1);
        usize::try_from(size / per + 1).unwrap_or(usize::MAX)
    }

    pub fn wants_exact(&self, size: u64) -> bool {
        match self.strategy {
            Strategy::Exact => true,
            Strategy::Sharded { .. } => false,
            Strategy::Auto => size <= self.size_threshold_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_from_str() {
        assert_eq!("auto".parse::<Strategy>(), Ok(Strategy::Auto));
        assert_eq!("Exact".parse::<Strategy>(), Ok(Strategy::Exact));
        assert_eq!(
            "sharded".parse::<Strategy>(),
            Ok(Strategy::Sharded { shards: None })
        );
        assert_eq!(
            "sharded:12".parse::<Strategy>(),
            Ok(Strategy::Sharded { shards: Some(12) })
        );
        assert!("sharded:0".parse::<Strategy>().is_err());
        assert!("fast".parse::<Strategy>().is_err());
    }

    #[test]
    fn shard_count_follows_bytes_per_shard() {
        let opts = CountOptions::default();
        assert_eq!(opts.shard_count_for(0), 1);
        assert_eq!(opts.shard_count_for(51 * MB), 1);
        assert_eq!(opts.shard_count_for(350 * MB), 2);
        assert_eq!(opts.shard_count_for(1049 * MB), 3);
    }

    #[test]
    fn auto_switches_at_threshold() {
        let opts = CountOptions::default();
        assert!(opts.wants_exact(DEFAULT_SIZE_THRESHOLD_BYTES));
        assert!(!opts.wants_exact(DEFAULT_SIZE_THRESHOLD_BYTES + 1));

        let forced = CountOptions {
            strategy: Strategy::Sharded { shards: Some(3) },
            ..CountOptions::default()
        };
        assert!(!forced.wants_exact(0));
    }

    const VARS: [&str; 7] = [
        "ADDRCOUNT_STRATEGY",
        "ADDRCOUNT_BYTES_PER_SHARD",
        "ADDRCOUNT_SIZE_THRESHOLD_BYTES",
        "ADDRCOUNT_POLICY",
        "ADDRCOUNT_MAX_RSS_BYTES",
        "ADDRCOUNT_MAX_RSS_MB",
        "ADDRCOUNT_MAX_RSS_GB",
    ];

    // Env is process-global; serialize every test that touches it.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn with_env<R>(pairs: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for v in VARS {
            unsafe { std::env::remove_var(v) };
        }
        for (k, v) in pairs {
            unsafe { std::env::set_var(k, v) };
        }
        let out = f();
        for v in VARS {
            unsafe { std::env::remove_var(v) };
        }
        out
    }

    #[test]
    fn from_env_layers_overrides() {
        let opts = with_env(
            &[
                ("ADDRCOUNT_STRATEGY", "sharded:6"),
                ("ADDRCOUNT_BYTES_PER_SHARD", "4096"),
                ("ADDRCOUNT_POLICY", "lenient"),
            ],
            CountOptions::from_env,
        );
        assert_eq!(opts.strategy, Strategy::Sharded { shards: Some(6) });
        assert_eq!(opts.bytes_per_shard, 4096);
        assert_eq!(opts.policy, ParsePolicy::Lenient);
        assert_eq!(opts.size_threshold_bytes, DEFAULT_SIZE_THRESHOLD_BYTES);
    }

    #[test]
    fn from_env_ignores_zero_and_garbage() {
        let opts = with_env(
            &[
                ("ADDRCOUNT_BYTES_PER_SHARD", "0"),
                ("ADDRCOUNT_SIZE_THRESHOLD_BYTES", "lots"),
                ("ADDRCOUNT_STRATEGY", "sharded:0"),
            ],
            CountOptions::from_env,
        );
        assert_eq!(opts.bytes_per_shard, DEFAULT_BYTES_PER_SHARD);
        assert_eq!(opts.size_threshold_bytes, DEFAULT_SIZE_THRESHOLD_BYTES);
        assert_eq!(opts.strategy, Strategy::Auto);
    }

    #[test]
    fn rss_budget_falls_back_bytes_mb_gb() {
        let all = with_env(
            &[
                ("ADDRCOUNT_MAX_RSS_BYTES", "123"),
                ("ADDRCOUNT_MAX_RSS_MB", "2"),
                ("ADDRCOUNT_MAX_RSS_GB", "1"),
            ],
            CountOptions::from_env,
        );
        assert_eq!(all.max_rss_bytes, Some(123));

        let mb = with_env(
            &[
                ("ADDRCOUNT_MAX_RSS_BYTES", "0"),
                ("ADDRCOUNT_MAX_RSS_MB", "2"),
                ("ADDRCOUNT_MAX_RSS_GB", "1"),
            ],
            CountOptions::from_env,
        );
        assert_eq!(mb.max_rss_bytes, Some(2 * MB));

        let gb = with_env(&[("ADDRCOUNT_MAX_RSS_GB", "3")], CountOptions::from_env);
        assert_eq!(gb.max_rss_bytes, Some(3 * GB));

        let none = with_env(&[], CountOptions::from_env);
        assert_eq!(none.max_rss_bytes, None);
    }
}
