pub mod canon;
pub mod key;

pub use canon::*;
pub use key::*;
