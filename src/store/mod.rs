//! Content-addressed blob store
//!
//! This module implements the on-disk storage layer. Blobs are stored as
//! plain files named by their SHA-256 hash, sharded into nested directories
//! by the leading bits of that hash, and published with an atomic rename.

mod content_store;
mod scan;
mod schema;
mod writer;

pub use content_store::ContentStore;
pub use scan::Scan;
pub use schema::{compare_bits, ShardSchema};
pub use writer::Writer;
