use ahash::AHashSet;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use tracing::warn;

use crate::address::{CanonicalKey, KEY_BYTES};
use crate::error::{CountError, Result};

const READ_BUF: usize = 1 << 20;

/// Fill `buf` from `r` until full or EOF; returns bytes read.
fn read_record<R: Read>(r: &mut R, buf: &mut [u8; KEY_BYTES]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < KEY_BYTES {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Distinct keys in one binary shard of 16-byte records.
///
/// A short trailing record ends the scan; it is logged, not counted.
pub fn count_shard(index: usize, path: &Path) -> Result<u64> {
    let io_err = |source: std::io::Error| CountError::ShardIo {
        shard: index,
        path: path.to_path_buf(),
        source,
    };

    let f = File::open(path).map_err(io_err)?;
    let len = f.metadata().map_err(io_err)?.len();
    let mut reader = BufReader::with_capacity(READ_BUF, f);

    let records = usize::try_from(len / KEY_BYTES as u64).unwrap_or(0);
    let mut seen: AHashSet<CanonicalKey> = AHashSet::with_capacity(records);
    let mut buf = [0u8; KEY_BYTES];

    loop {
        match read_record(&mut reader, &mut buf).map_err(io_err)? {
            0 => break,
            KEY_BYTES => {
                seen.insert(CanonicalKey::from_bytes(&buf));
            }
            partial => {
                warn!(shard = index, bytes = partial, "truncated trailing record ignored");
                break;
            }
        }
    }

    Ok(seen.len() as u64)
}
