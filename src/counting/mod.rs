pub mod driver;
pub mod exact;
pub mod input;
pub mod partition;
pub mod shard;

pub use driver::*;
pub use exact::*;
pub use partition::{Partitioned, ShardFile, partition};
pub use shard::*;
