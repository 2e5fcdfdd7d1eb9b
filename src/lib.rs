//! Distinct IPv6 address counting for line-delimited text files.
//!
//! Small inputs go through one in-memory set. Large inputs are partitioned
//! into on-disk shards by a hash of the canonical key, then each shard is
//! de-duplicated on its own worker and the partial counts are summed.

pub mod address;
pub mod config;
pub mod counting;
pub mod error;
pub mod runtime;

pub use address::{CanonicalKey, ParsePolicy, canonicalize, shard_of};
pub use config::{CountOptions, Strategy};
pub use counting::{CountReport, PathTaken, count_exact, count_unique, count_unique_report};
pub use error::{AddressFault, CountError};
