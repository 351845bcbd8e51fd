//! Staging writer for a single blob publish

use crate::model::Hash;
use crate::store::content_store::{sync_dir, ContentStore, INCOMING_PREFIX};
use crate::Result;
use sha2::{Digest, Sha256};
use std::io::{self, ErrorKind, Write};
use tempfile::NamedTempFile;

/// Outcome of a successful [`Writer::close`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Closed {
    hash: Hash,
    newly_written: bool,
}

/// Streams bytes into a temp file inside the store root while hashing them.
///
/// Dropping a writer without closing it discards the staged bytes.
pub struct Writer<'a> {
    store: &'a ContentStore,
    /// `Some` while the temp file still needs closing and removal
    temp: Option<NamedTempFile>,
    hasher: Sha256,
    closed: Option<Closed>,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(store: &'a ContentStore) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(INCOMING_PREFIX)
            .tempfile_in(store.root())?;
        Ok(Writer {
            store,
            temp: Some(temp),
            hasher: Sha256::new(),
            closed: None,
        })
    }

    /// Hash of the bytes written so far
    pub fn current_hash(&self) -> Hash {
        Hash::from_bytes(self.hasher.clone().finalize().into())
    }

    /// Publish the staged blob under its content hash.
    ///
    /// If a blob with the same hash is already stored this is a dedup hit:
    /// the call succeeds and [`is_new`](Self::is_new) reports `false`. The
    /// temp file is cleaned up whatever the outcome.
    pub fn close(&mut self) -> Result<()> {
        let outcome = self.publish();
        self.abort();
        outcome
    }

    fn publish(&mut self) -> Result<()> {
        let hash = self.current_hash();
        let full_path = self.store.full_path(hash.as_ref());

        if full_path.try_exists()? {
            tracing::debug!(hash = %hash, "blob already stored");
            self.closed = Some(Closed {
                hash,
                newly_written: false,
            });
            return Ok(());
        }

        let temp = self.temp.take().ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "writer has no staged file to publish")
        })?;
        if self.store.fsync() {
            temp.as_file().sync_data()?;
        }

        let published = match temp.persist(&full_path) {
            Ok(file) => file,
            Err(e) if e.error.kind() == ErrorKind::NotFound => {
                self.store.create_dirs(hash.as_ref())?;
                e.file.persist(&full_path).map_err(|e| e.error)?
            }
            Err(e) => return Err(e.error.into()),
        };
        drop(published);

        if self.store.fsync() {
            if let Some(parent) = full_path.parent() {
                sync_dir(parent)?;
            }
        }

        self.closed = Some(Closed {
            hash,
            newly_written: true,
        });
        Ok(())
    }

    /// Discard the staged file if it is still pending.
    ///
    /// Idempotent, and a no-op after a successful publish. Cleanup failures
    /// are logged and swallowed.
    pub fn abort(&mut self) {
        if let Some(temp) = self.temp.take() {
            let path = temp.path().to_path_buf();
            if let Err(e) = temp.close() {
                tracing::debug!(path = %path.display(), error = %e, "failed to remove temp file");
            }
        }
    }

    /// Content hash of the published blob.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful [`close`](Self::close).
    pub fn hash(&self) -> Hash {
        match self.closed {
            Some(closed) => closed.hash,
            None => panic!("Writer::hash() called without a successful close()"),
        }
    }

    /// Whether [`close`](Self::close) wrote a new file rather than hitting
    /// an existing one.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful [`close`](Self::close).
    pub fn is_new(&self) -> bool {
        match self.closed {
            Some(closed) => closed.newly_written,
            None => panic!("Writer::is_new() called without a successful close()"),
        }
    }
}

impl Write for Writer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let temp = self
            .temp
            .as_mut()
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "writer is already closed"))?;
        let n = temp.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.temp.as_mut() {
            Some(temp) => temp.flush(),
            None => Ok(()),
        }
    }
}
