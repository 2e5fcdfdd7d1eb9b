use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::exact::tally_exact;
use super::input::input_size;
use super::partition::partition;
use super::shard::count_shard;
use crate::config::{CountOptions, Strategy};
use crate::error::{CountError, Result};
use crate::runtime::check_memory;

/// Wall-clock budget shared by the partition pass and all shard workers.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.start.elapsed() > self.limit {
            return Err(CountError::Timeout { limit: self.limit });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTaken {
    Exact,
    Sharded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountReport {
    pub unique: u64,
    /// Non-blank lines consumed.
    pub lines: u64,
    pub path_taken: PathTaken,
    /// 0 on the exact path.
    pub shards: usize,
    pub input_bytes: u64,
}

fn progress_bar(enabled: bool, len: u64, template: &str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    match ProgressStyle::with_template(template) {
        Ok(style) => pb.set_style(style.progress_chars("=>-")),
        Err(err) => warn!(%err, "bad progress template; using default"),
    }
    pb
}

/// Number of distinct addresses in `path`.
pub fn count_unique(path: &Path, opts: &CountOptions) -> Result<u64> {
    Ok(count_unique_report(path, opts)?.unique)
}

pub fn count_unique_report(path: &Path, opts: &CountOptions) -> Result<CountReport> {
    let size = input_size(path)?;

    if opts.wants_exact(size) {
        let t0 = Instant::now();
        let tally = tally_exact(path, opts.policy)?;
        info!(
            unique = tally.unique,
            lines = tally.lines,
            bytes = size,
            secs = t0.elapsed().as_secs_f64(),
            "exact path"
        );
        return Ok(CountReport {
            unique: tally.unique,
            lines: tally.lines,
            path_taken: PathTaken::Exact,
            shards: 0,
            input_bytes: size,
        });
    }

    let shards = match opts.strategy {
        Strategy::Sharded { shards: Some(n) } => n.max(1),
        _ => opts.shard_count_for(size),
    };
    count_sharded_with(path, shards, opts, count_shard)
}

/// Sharded path with a caller-supplied per-shard counter.
///
/// Shard files live in a fresh directory that is removed on every exit path,
/// including unwinding out of a panicking worker.
pub fn count_sharded_with<F>(
    path: &Path,
    shards: usize,
    opts: &CountOptions,
    counter: F,
) -> Result<CountReport>
where
    F: Fn(usize, &Path) -> Result<u64> + Sync,
{
    let size = input_size(path)?;
    let parent = opts.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
    let dir = tempfile::Builder::new()
        .prefix("addrcount-")
        .tempdir_in(&parent)
        .map_err(|source| CountError::ShardDir {
            path: parent.clone(),
            source,
        })?;

    let outcome = run_sharded(path, size, shards.max(1), dir.path(), opts, &counter);

    let dir_path = dir.path().to_path_buf();
    if let Err(err) = dir.close() {
        warn!(dir = %dir_path.display(), %err, "failed to remove shard directory");
    }
    outcome
}

fn run_sharded<F>(
    path: &Path,
    size: u64,
    shards: usize,
    dir: &Path,
    opts: &CountOptions,
    counter: &F,
) -> Result<CountReport>
where
    F: Fn(usize, &Path) -> Result<u64> + Sync,
{
    let t0 = Instant::now();
    let deadline = opts.sharded_timeout.map(Deadline::new);

    let pb = progress_bar(
        opts.progress,
        size,
        "[{elapsed_precise}] {bar:40} {bytes}/{total_bytes} partition {msg}",
    );
    let parted = partition(path, shards, dir, opts.policy, &pb, deadline)?;
    pb.finish_and_clear();
    if let Some(d) = deadline {
        d.check()?;
    }

    // fan out: one task per shard, each writing only its own slot
    let pb = progress_bar(
        opts.progress,
        shards as u64,
        "[{elapsed_precise}] {bar:40} {pos}/{len} shards {msg}",
    );
    let abort = AtomicBool::new(false);
    let partials: Vec<Option<Result<u64>>> = parted
        .shards
        .par_iter()
        .map(|s| {
            if abort.load(Ordering::Relaxed) {
                return None;
            }
            let r = deadline
                .map_or(Ok(()), |d| d.check())
                .and_then(|_| counter(s.index, s.path.as_path()))
                .and_then(|n| {
                    check_memory("shard", opts.max_rss_bytes)?;
                    Ok(n)
                });
            if r.is_err() {
                abort.store(true, Ordering::Relaxed);
            }
            pb.set_message(format!("shard={} records={}", s.index, s.records));
            pb.inc(1);
            Some(r)
        })
        .collect();
    pb.finish_and_clear();

    let unique = aggregate(partials)?;
    info!(
        unique,
        lines = parted.lines,
        shards,
        bytes = size,
        secs = t0.elapsed().as_secs_f64(),
        "sharded path"
    );

    Ok(CountReport {
        unique,
        lines: parted.lines,
        path_taken: PathTaken::Sharded,
        shards,
        input_bytes: size,
    })
}

/// Sum partials, or fail if any slot did not produce a count.
fn aggregate(partials: Vec<Option<Result<u64>>>) -> Result<u64> {
    let total = partials.len();
    let mut sum = 0u64;
    let mut failed = 0usize;
    let mut skipped = 0usize;
    let mut first: Option<CountError> = None;

    for p in partials {
        match p {
            Some(Ok(n)) => sum += n,
            Some(Err(e)) => {
                failed += 1;
                if first.is_none() {
                    first = Some(e);
                }
            }
            None => skipped += 1,
        }
    }

    match first {
        Some(e) => {
            warn!(failed, skipped, total, "shard workers failed; discarding partial sum");
            Err(CountError::WorkerFailure {
                failed,
                total,
                first: Box::new(e),
            })
        }
        None => Ok(sum),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_sums_clean_runs() {
        assert_eq!(aggregate(vec![Some(Ok(3)), Some(Ok(4))]).unwrap(), 7);
        assert_eq!(aggregate(vec![]).unwrap(), 0);
    }

    #[test]
    fn aggregate_refuses_partial_totals() {
        let partials = vec![
            Some(Ok(3)),
            Some(Err(CountError::Timeout {
                limit: Duration::from_secs(1),
            })),
            None,
            Some(Err(CountError::MemoryCeiling { rss: 2, limit: 1 })),
        ];
        match aggregate(partials).unwrap_err() {
            CountError::WorkerFailure {
                failed,
                total,
                first,
            } => {
                assert_eq!(failed, 2);
                assert_eq!(total, 4);
                assert!(matches!(*first, CountError::Timeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expired_deadline_trips() {
        let d = Deadline::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(d.check(), Err(CountError::Timeout { .. })));
        assert!(Deadline::new(Duration::from_secs(3600)).check().is_ok());
    }
}
