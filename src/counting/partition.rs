use indicatif::ProgressBar;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use super::driver::Deadline;
use super::input::for_each_key;
use crate::address::{ParsePolicy, shard_of};
use crate::error::{CountError, Result};

const WRITE_BUF: usize = 64 * 1024;
/// How often (in keys) the partition pass checks its deadline.
const DEADLINE_STRIDE: u64 = 1 << 16;

/// One fully written shard file.
#[derive(Debug, Clone)]
pub struct ShardFile {
    pub index: usize,
    pub path: PathBuf,
    pub records: u64,
}

pub fn shard_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("shard-{index:05}.bin"))
}

fn shard_io(index: usize, path: &Path, source: std::io::Error) -> CountError {
    CountError::ShardIo {
        shard: index,
        path: path.to_path_buf(),
        source,
    }
}

struct ShardWriter {
    index: usize,
    path: PathBuf,
    out: BufWriter<File>,
    records: u64,
}

impl ShardWriter {
    fn create(dir: &Path, index: usize) -> Result<Self> {
        let path = shard_path(dir, index);
        let f = File::create(&path).map_err(|e| shard_io(index, &path, e))?;
        Ok(Self {
            index,
            path,
            out: BufWriter::with_capacity(WRITE_BUF, f),
            records: 0,
        })
    }

    #[inline]
    fn push(&mut self, record: &[u8]) -> Result<()> {
        self.records += 1;
        self.out
            .write_all(record)
            .map_err(|e| shard_io(self.index, &self.path, e))
    }

    fn finish(self) -> Result<ShardFile> {
        let f = self
            .out
            .into_inner()
            .map_err(|e| shard_io(self.index, &self.path, e.into_error()))?;
        f.sync_all().map_err(|e| shard_io(self.index, &self.path, e))?;
        Ok(ShardFile {
            index: self.index,
            path: self.path,
            records: self.records,
        })
    }
}

#[derive(Debug)]
pub struct Partitioned {
    pub shards: Vec<ShardFile>,
    pub lines: u64,
}

/// Route every key of `input` into one of `shards` files under `dir`.
///
/// Identical addresses always land in the same file because routing uses the
/// canonical key only. All files are flushed and closed before this returns.
pub fn partition(
    input: &Path,
    shards: usize,
    dir: &Path,
    policy: ParsePolicy,
    progress: &ProgressBar,
    deadline: Option<Deadline>,
) -> Result<Partitioned> {
    let shards = shards.max(1);
    let t0 = Instant::now();

    let mut writers = (0..shards)
        .map(|i| ShardWriter::create(dir, i))
        .collect::<Result<Vec<_>>>()?;

    let mut routed = 0u64;
    let lines = for_each_key(input, policy, |key, n| {
        writers[shard_of(&key, shards)].push(&key.to_bytes())?;
        progress.inc(n as u64);
        routed += 1;
        if routed % DEADLINE_STRIDE == 0 {
            if let Some(d) = deadline {
                d.check()?;
            }
        }
        Ok(())
    })?;

    let shards_out = writers
        .into_iter()
        .map(ShardWriter::finish)
        .collect::<Result<Vec<_>>>()?;

    for s in &shards_out {
        debug!(shard = s.index, records = s.records, "shard written");
    }
    info!(
        shards,
        lines,
        secs = t0.elapsed().as_secs_f64(),
        "partition pass done"
    );

    Ok(Partitioned {
        shards: shards_out,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{CanonicalKey, KEY_BYTES, canonicalize_strict};
    use std::io::Write as _;

    fn input(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
        f.flush().unwrap();
        f
    }

    fn read_keys(path: &Path) -> Vec<CanonicalKey> {
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(bytes.len() % KEY_BYTES, 0);
        bytes
            .chunks_exact(KEY_BYTES)
            .map(|c| CanonicalKey::from_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn equivalent_forms_share_a_shard() {
        let f = input(&[
            "2001:db8::1",
            "2001:0DB8:0000:0000:0000:0000:0000:0001",
            "fe80::1",
            "::",
            "0:0:0:0:0:0:0:0",
        ]);
        let dir = tempfile::tempdir().unwrap();
        let out = partition(
            f.path(),
            4,
            dir.path(),
            ParsePolicy::Strict,
            &ProgressBar::hidden(),
            None,
        )
        .unwrap();

        assert_eq!(out.lines, 5);
        assert_eq!(out.shards.len(), 4);
        assert_eq!(out.shards.iter().map(|s| s.records).sum::<u64>(), 5);

        let target = canonicalize_strict("2001:db8::1").unwrap();
        let holders: Vec<usize> = out
            .shards
            .iter()
            .filter(|s| read_keys(&s.path).contains(&target))
            .map(|s| s.index)
            .collect();
        assert_eq!(holders, vec![shard_of(&target, 4)]);
        assert_eq!(
            read_keys(&out.shards[holders[0]].path)
                .iter()
                .filter(|k| **k == target)
                .count(),
            2
        );
    }

    #[test]
    fn routing_is_reproducible() {
        let lines: Vec<String> = (0..200).map(|i| format!("2001:db8::{i:x}")).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let f = input(&refs);

        let run = || {
            let dir = tempfile::tempdir().unwrap();
            let out = partition(
                f.path(),
                5,
                dir.path(),
                ParsePolicy::Strict,
                &ProgressBar::hidden(),
                None,
            )
            .unwrap();
            out.shards
                .iter()
                .map(|s| read_keys(&s.path))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn missing_dir_is_shard_io() {
        let f = input(&["::1"]);
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("missing");
        let err = partition(
            f.path(),
            2,
            &gone,
            ParsePolicy::Strict,
            &ProgressBar::hidden(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CountError::ShardIo { shard: 0, .. }));
    }
}
