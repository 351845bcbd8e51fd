//! XOR digest tree
//!
//! A compact, continuously updated checksum per hash-prefix bucket. Each
//! layer is a flat file of 32-byte slots mapped into memory:
//!
//! ```text
//! <cache_dir>/xors-<layer_bits>-layer-<i>
//!   slot[p] = XOR of every stored hash whose top prefix_bits(i) bits == p
//! ```
//!
//! Comparing a bucket's slot against the XOR of the hashes actually on disk
//! reveals missing or extra blobs without exchanging full listings.

mod layer;
mod tree;

pub use layer::{layer_file_size, Layer, MAX_PREFIX_BITS, PAGE_SIZE};
pub use tree::DigestTree;
