//! Peer replication transport
//!
//! Peers are other xorcas servers addressed by base URL
//! (`http://host:port`, or a bare `host:port`). Blobs move between them over
//! the internal endpoints:
//!
//! - `GET  /internal/blob/<hex>` to pull a blob
//! - `POST /internal/upload` with an `X-Blob-Hash` header to push one

mod client;

pub use client::{Fetched, PeerClient, PeerConfig, PushOutcome, HASH_HEADER};

use crate::Result;
use parking_lot::RwLock;

/// Supplies the current peer set.
///
/// How peers are discovered is up to the implementation; the coordinator
/// only asks for the list when it needs to replicate.
pub trait PeerSource: Send + Sync {
    fn peers(&self) -> Result<Vec<String>>;
}

/// A fixed (but replaceable) list of peer base URLs
#[derive(Debug, Default)]
pub struct StaticPeers {
    peers: RwLock<Vec<String>>,
}

impl StaticPeers {
    pub fn new(peers: Vec<String>) -> Self {
        StaticPeers {
            peers: RwLock::new(peers),
        }
    }

    /// Replace the peer list
    pub fn set(&self, peers: Vec<String>) {
        *self.peers.write() = peers;
    }
}

impl PeerSource for StaticPeers {
    fn peers(&self) -> Result<Vec<String>> {
        Ok(self.peers.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_peers() {
        let peers = StaticPeers::new(vec!["a:1".into()]);
        assert_eq!(peers.peers().unwrap(), vec!["a:1".to_string()]);

        peers.set(vec!["b:2".into(), "c:3".into()]);
        assert_eq!(peers.peers().unwrap().len(), 2);
    }
}
