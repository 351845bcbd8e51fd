//! High-level store API
//!
//! The [`Coordinator`] owns the blob store and the digest tree and keeps
//! them in step: a blob becomes visible on disk and gets XORed into the
//! digest under one exclusive lock, so no observer ever sees one without the
//! other (short of a crash between the two, which [`Coordinator::verify`]
//! repairs).

use crate::config::Config;
use crate::digest::DigestTree;
use crate::model::{Hash, HASH_LEN};
use crate::remote::{PeerClient, PeerConfig, PeerSource, PushOutcome, StaticPeers};
use crate::store::{ContentStore, Writer};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Weak};

/// Background verifications that may wait for the worker at once
const VERIFY_QUEUE_DEPTH: usize = 64;

/// Result of storing a blob
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PutOutcome {
    pub hash: Hash,
    /// `false` when the blob was already stored
    pub newly_written: bool,
}

/// Result of a peer announcing a blob
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(PutOutcome),
    /// The blob was already present; a verification pass was scheduled
    AlreadyExists,
}

/// Result of a successful verification pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// Disk and digest agree for the bucket
    Consistent,
    /// The probed hash was missing from the digest and has been added
    Healed,
}

/// Coordinates writes, reads and verification across the blob store and
/// the digest tree.
///
/// The `RwLock` around the digest tree is the store-wide lock: every
/// sequence that mutates either structure holds it exclusively, pure reads
/// share it.
pub struct Coordinator {
    store: ContentStore,
    digest: RwLock<DigestTree>,
    peers: Arc<dyn PeerSource>,
    client: PeerClient,
    verifier: Mutex<Option<VerifyQueue>>,
}

/// Feed of the background verify worker
struct VerifyQueue {
    tx: SyncSender<Hash>,
    /// Hashes queued or being verified
    pending: HashSet<Hash>,
}

impl Coordinator {
    /// Combine an opened store and digest tree, with no peers
    pub fn new(store: ContentStore, digest: DigestTree) -> Self {
        Coordinator {
            store,
            digest: RwLock::new(digest),
            peers: Arc::new(StaticPeers::default()),
            client: PeerClient::default(),
            verifier: Mutex::new(None),
        }
    }

    /// Open the stores described by a config
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = ContentStore::open(&config.data_dir, config.schema()?, config.fsync)?;
        let digest = DigestTree::open(
            &config.cache_dir,
            config.digest_layers,
            config.digest_layer_bits,
        )?;
        Ok(Self::new(store, digest)
            .with_peers(Arc::new(StaticPeers::new(config.peers.clone())))
            .with_client(PeerClient::new(PeerConfig {
                timeout_secs: config.peer_timeout_secs,
            })))
    }

    /// Use a different peer source
    pub fn with_peers(mut self, peers: Arc<dyn PeerSource>) -> Self {
        self.peers = peers;
        self
    }

    /// Use a different peer client
    pub fn with_client(mut self, client: PeerClient) -> Self {
        self.client = client;
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Prefix length of the finest digest layer
    pub fn depth(&self) -> u32 {
        self.digest.read().depth()
    }

    // === Writes ===

    /// Stream a blob into the store
    pub fn put<R: Read>(&self, body: R) -> Result<PutOutcome> {
        self.put_expecting(body, None)
    }

    /// Stream a blob into the store, refusing it unless it hashes to
    /// `expected`. A refused blob is discarded without being published.
    pub fn put_expecting<R: Read>(&self, mut body: R, expected: Option<&Hash>) -> Result<PutOutcome> {
        let mut writer = self.store.new_writer()?;
        io::copy(&mut body, &mut writer)?;
        self.publish(writer, expected)
    }

    fn publish(&self, mut writer: Writer<'_>, expected: Option<&Hash>) -> Result<PutOutcome> {
        if let Some(expected) = expected {
            let actual = writer.current_hash();
            if actual != *expected {
                writer.abort();
                return Err(Error::HashMismatch {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                });
            }
        }

        let mut digest = self.digest.write();
        writer.close()?;
        let outcome = PutOutcome {
            hash: writer.hash(),
            newly_written: writer.is_new(),
        };
        if outcome.newly_written {
            digest.add(&outcome.hash)?;
        }
        Ok(outcome)
    }

    /// Handle a blob announced by a peer.
    ///
    /// If the blob is already stored, a verification pass for the hash is
    /// scheduled in the background and the body is read to the end and
    /// discarded, so the sender can finish its upload. Nothing is written
    /// and nothing is re-added to the digest.
    pub fn ingest<R: Read>(self: &Arc<Self>, hash: &Hash, mut body: R) -> Result<IngestOutcome> {
        if self.has(hash)? {
            self.verify_in_background(*hash);
            io::copy(&mut body, &mut io::sink())?;
            return Ok(IngestOutcome::AlreadyExists);
        }
        let outcome = self.put_expecting(body, Some(hash))?;
        Ok(IngestOutcome::Stored(outcome))
    }

    // === Reads ===

    /// Check whether a blob is stored
    pub fn has(&self, hash: &Hash) -> Result<bool> {
        let _guard = self.digest.read();
        self.store.has(hash.as_ref())
    }

    /// Open a stored blob; `Ok(None)` when absent
    pub fn get(&self, hash: &Hash) -> Result<Option<File>> {
        let _guard = self.digest.read();
        self.store.get(hash.as_ref())
    }

    /// Read a whole blob into memory
    pub fn read(&self, hash: &Hash) -> Result<Vec<u8>> {
        let mut file = self
            .get(hash)?
            .ok_or_else(|| Error::NotFound(hash.to_hex()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// List stored hashes whose top `bits` bits match `prefix`.
    ///
    /// Runs without the lock; blobs published during the walk may or may not
    /// be included.
    pub fn list(&self, prefix: &[u8], bits: u32) -> Result<Vec<Hash>> {
        if bits as usize > HASH_LEN * 8 {
            return Err(Error::InvalidHash(format!(
                "prefix of {} bits is longer than a hash",
                bits
            )));
        }
        if (prefix.len() as u64) * 8 < bits as u64 {
            return Err(Error::InvalidHash(format!(
                "prefix of {} bytes cannot cover {} bits",
                prefix.len(),
                bits
            )));
        }
        self.store.list(prefix, bits)
    }

    /// Accumulated digest of the finest bucket `hash` falls into
    pub fn digest_leaf(&self, hash: &Hash) -> Result<Hash> {
        self.digest.read().get_leaf(hash)
    }

    // === Verification ===

    /// Recompute the digest bucket of `hash` from disk and compare.
    ///
    /// A difference of exactly `hash` means a single missed digest update
    /// and is repaired. Any other difference is reported as
    /// [`Error::Corruption`] and left alone.
    pub fn verify(&self, hash: &Hash) -> Result<VerifyOutcome> {
        let mut digest = self.digest.write();
        let depth = digest.depth();

        let mut computed = Hash::ZERO;
        for found in self.store.scan(hash.as_ref(), depth) {
            computed ^= found?;
        }
        let stored = digest.get_leaf(hash)?;

        let diff = stored ^ computed;
        if diff.is_zero() {
            return Ok(VerifyOutcome::Consistent);
        }
        if diff == *hash {
            digest.add(hash)?;
            tracing::warn!(hash = %hash, "digest was missing a stored blob; repaired");
            return Ok(VerifyOutcome::Healed);
        }

        let prefix = format!("{:x}/{}", hash.prefix_bits(depth), depth);
        tracing::error!(
            hash = %hash,
            prefix = %prefix,
            stored = %stored,
            computed = %computed,
            "digest diverges from disk by more than one blob"
        );
        Err(Error::Corruption {
            prefix,
            stored: stored.to_hex(),
            computed: computed.to_hex(),
        })
    }

    /// Queue [`verify`](Self::verify) for the background worker. The
    /// outcome is only logged.
    ///
    /// One worker thread serves every request, started on first use. A hash
    /// that is already queued or being verified is not queued again, and
    /// requests beyond the queue depth are dropped. Returns whether the hash
    /// was queued.
    pub fn verify_in_background(self: &Arc<Self>, hash: Hash) -> bool {
        let mut verifier = self.verifier.lock();
        if verifier.is_none() {
            match self.start_verifier() {
                Ok(queue) => *verifier = Some(queue),
                Err(e) => {
                    tracing::error!(hash = %hash, error = %e, "could not start verify worker");
                    return false;
                }
            }
        }
        let Some(queue) = verifier.as_mut() else {
            return false;
        };

        if !queue.pending.insert(hash) {
            tracing::trace!(hash = %hash, "verification already pending");
            return false;
        }
        match queue.tx.try_send(hash) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                queue.pending.remove(&hash);
                tracing::debug!(hash = %hash, "verify queue full; dropping request");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                *verifier = None;
                tracing::warn!(hash = %hash, "verify worker exited; dropping request");
                false
            }
        }
    }

    fn start_verifier(self: &Arc<Self>) -> io::Result<VerifyQueue> {
        let (tx, rx) = mpsc::sync_channel(VERIFY_QUEUE_DEPTH);
        let this = Arc::downgrade(self);
        std::thread::Builder::new()
            .name("xorcas-verify".into())
            .spawn(move || run_verifier(this, rx))?;
        Ok(VerifyQueue {
            tx,
            pending: HashSet::new(),
        })
    }

    /// XOR a hash into the digest without storing anything.
    ///
    /// This deliberately breaks the store/digest invariant; it exists to
    /// reproduce divergence in tests and on debug deployments.
    pub fn debug_add_digest(&self, hash: &Hash) -> Result<()> {
        tracing::warn!(hash = %hash, "adding hash to digest without a blob");
        self.digest.write().add(hash)
    }

    // === Peers ===

    /// Fetch a blob from a peer and store it like a local put
    pub fn pull(&self, peer: &str, hash: &Hash) -> Result<PutOutcome> {
        let mut body = self.client.fetch(peer, hash)?;
        let mut writer = self.store.new_writer()?;
        io::copy(&mut body, &mut writer)?;
        self.publish(writer, Some(hash))
    }

    /// Send a locally stored blob to a peer
    pub fn push(&self, peer: &str, hash: &Hash) -> Result<PushOutcome> {
        let file = self
            .get(hash)?
            .ok_or_else(|| Error::NotFound(hash.to_hex()))?;
        self.client.send(peer, hash, file)
    }

    /// Push a blob to every known peer. Returns how many accepted it.
    pub fn replicate(&self, hash: &Hash) -> Result<usize> {
        let peers = self.peers.peers()?;
        let mut delivered = 0;
        for peer in &peers {
            match self.push(peer, hash) {
                Ok(outcome) => {
                    tracing::debug!(peer = %peer, hash = %hash, ?outcome, "replicated");
                    delivered += 1;
                }
                Err(e) => tracing::warn!(peer = %peer, hash = %hash, error = %e, "replication failed"),
            }
        }
        Ok(delivered)
    }

    /// Flush the digest tree to disk
    pub fn flush(&self) -> Result<()> {
        self.digest.read().flush()
    }
}

/// Verify queued hashes until the coordinator is dropped
fn run_verifier(coordinator: Weak<Coordinator>, rx: Receiver<Hash>) {
    while let Ok(hash) = rx.recv() {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        match coordinator.verify(&hash) {
            Ok(outcome) => tracing::debug!(hash = %hash, ?outcome, "verification finished"),
            Err(e) => tracing::error!(hash = %hash, error = %e, "verification failed"),
        }
        if let Some(queue) = coordinator.verifier.lock().as_mut() {
            queue.pending.remove(&hash);
        };
    }
    tracing::debug!("verify worker stopped");
}
