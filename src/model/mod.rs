//! Core data model types for xorcas

mod hash;
mod prefix;

pub use hash::{Hash, HASH_LEN};
pub use prefix::parse_prefix;
