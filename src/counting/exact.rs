use ahash::AHashSet;
use std::path::Path;
use tracing::debug;

use super::input::{for_each_key, input_size};
use crate::address::{CanonicalKey, ParsePolicy};
use crate::error::Result;

/// Rough bytes per input line, used only to pre-size the set.
const BYTES_PER_LINE_HINT: u64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub unique: u64,
    pub lines: u64,
}

/// Distinct addresses in `path`, held in one in-memory set.
pub fn count_exact(path: &Path, policy: ParsePolicy) -> Result<u64> {
    Ok(tally_exact(path, policy)?.unique)
}

pub fn tally_exact(path: &Path, policy: ParsePolicy) -> Result<Tally> {
    let hint = input_size(path)? / BYTES_PER_LINE_HINT;
    let mut seen: AHashSet<CanonicalKey> =
        AHashSet::with_capacity(usize::try_from(hint).unwrap_or(0));

    let lines = for_each_key(path, policy, |key, _| {
        seen.insert(key);
        Ok(())
    })?;

    debug!(path = %path.display(), lines, unique = seen.len(), "exact count done");
    Ok(Tally {
        unique: seen.len() as u64,
        lines,
    })
}
