//! # xorcas
//!
//! A content-addressed blob store with XOR digests for cheap replica
//! comparison.
//!
//! Blobs are stored as plain files named by their SHA-256 hash and sharded
//! into directories by the leading bits of that hash. Alongside the blobs, a
//! memory-mapped digest tree keeps, for every hash prefix, the XOR of all
//! hashes stored under it. Two nodes holding the same blobs hold the same
//! digests, and a node can check any bucket of its own digest against what
//! is really on disk.
//!
//! ## Core Concepts
//!
//! - **ContentStore**: sharded blob files, published by atomic rename
//! - **DigestTree**: layered XOR accumulators over hash prefixes
//! - **Coordinator**: keeps both in step under one lock, verifies buckets and
//!   moves blobs between peers
//!
//! ## Example
//!
//! ```ignore
//! use xorcas::{Config, Coordinator};
//!
//! let coordinator = Coordinator::open(&Config::default())?;
//! let outcome = coordinator.put(&b"hello"[..])?;
//! assert_eq!(coordinator.read(&outcome.hash)?, b"hello");
//! ```

pub mod config;
pub mod digest;
pub mod model;
pub mod remote;
pub mod server;
pub mod store;

mod coordinator;
mod error;

pub use config::Config;
pub use coordinator::{Coordinator, IngestOutcome, PutOutcome, VerifyOutcome};
pub use digest::DigestTree;
pub use error::{Error, Result};
pub use model::Hash;
pub use remote::{PeerClient, PeerConfig, PeerSource, PushOutcome, StaticPeers};
pub use server::{Server, ServerOptions};
pub use store::{ContentStore, ShardSchema, Writer};
