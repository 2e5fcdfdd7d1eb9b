use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a counting run. At most one of these surfaces per run;
/// no partial total is ever returned alongside it.
#[derive(Debug, Error)]
pub enum CountError {
    #[error("cannot read input {path:?}: {source}")]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed address on line {line}: {text:?} ({reason})")]
    MalformedAddress {
        line: u64,
        text: String,
        reason: AddressFault,
    },

    #[error("shard {shard} I/O failure at {path:?}: {source}")]
    ShardIo {
        shard: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create shard directory under {path:?}: {source}")]
    ShardDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{failed} of {total} shard workers failed; first: {first}")]
    WorkerFailure {
        failed: usize,
        total: usize,
        #[source]
        first: Box<CountError>,
    },

    #[error("sharded count exceeded its {limit:?} time limit")]
    Timeout { limit: Duration },

    #[error("resident memory {rss} bytes exceeded limit {limit} bytes")]
    MemoryCeiling { rss: u64, limit: u64 },
}

/// Why a single line failed strict canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressFault {
    #[error("expected 8 groups, found {0}")]
    GroupCount(usize),
    #[error("more than one `::` marker")]
    RepeatedCompression,
    #[error("`::` present but no groups left to compress")]
    EmptyCompression,
    #[error("invalid hextet {0:?}")]
    BadHextet(String),
    #[error("line is not valid UTF-8")]
    NotUtf8,
}

pub type Result<T> = std::result::Result<T, CountError>;
