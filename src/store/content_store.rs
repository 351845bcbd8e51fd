//! Sharded on-disk blob store
//!
//! Layout:
//! ```text
//! <root>/<dir_1>/<dir_2>/.../<hex(hash)>
//! <root>/.incoming-XXXXXX          (in-flight writes)
//! ```
//!
//! Directory names come from the [`ShardSchema`]. A blob only ever appears at
//! its final path through an atomic rename, so readers never see a partial
//! file.

use crate::model::Hash;
use crate::store::schema::ShardSchema;
use crate::store::scan::Scan;
use crate::store::writer::Writer;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Prefix for temp files created inside the store root
pub(crate) const INCOMING_PREFIX: &str = ".incoming-";

/// A content-addressed blob store rooted at a directory
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    schema: ShardSchema,
    fsync: bool,
}

impl ContentStore {
    /// Open a store, creating the root directory if needed
    pub fn open(root: impl AsRef<Path>, schema: ShardSchema, fsync: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(ContentStore {
            root,
            schema,
            fsync,
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema(&self) -> &ShardSchema {
        &self.schema
    }

    /// Whether new blobs and directories are fsynced before publish
    pub fn fsync(&self) -> bool {
        self.fsync
    }

    /// Minimum hash length in bytes accepted by `has`/`get`
    pub fn min_bytes(&self) -> usize {
        self.schema.min_bytes()
    }

    /// Directory names for a hash, outermost first
    pub fn dirs_for(&self, hash: &[u8]) -> Vec<String> {
        self.schema.dirs_for(hash)
    }

    /// Final on-disk path of a blob
    pub fn full_path(&self, hash: &[u8]) -> PathBuf {
        let mut path = self.root.clone();
        for dir in self.dirs_for(hash) {
            path.push(dir);
        }
        path.push(hex::encode(hash));
        path
    }

    /// Start staging a new blob
    pub fn new_writer(&self) -> Result<Writer<'_>> {
        Writer::new(self)
    }

    /// Check whether a blob is present
    pub fn has(&self, hash: &[u8]) -> Result<bool> {
        self.check_len(hash)?;
        match fs::metadata(self.full_path(hash)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Open a blob for reading; `Ok(None)` when it is not stored
    pub fn get(&self, hash: &[u8]) -> Result<Option<File>> {
        self.check_len(hash)?;
        match File::open(self.full_path(hash)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk every stored hash whose top `bits` bits equal those of `prefix`.
    ///
    /// `bits == 0` enumerates the whole store. The walk is lazy and single
    /// pass; call again to restart from the root.
    pub fn scan(&self, prefix: &[u8], bits: u32) -> Scan<'_> {
        Scan::new(self, prefix, bits)
    }

    /// Collect [`scan`](Self::scan) into a vector
    pub fn list(&self, prefix: &[u8], bits: u32) -> Result<Vec<Hash>> {
        self.scan(prefix, bits).collect()
    }

    fn check_len(&self, hash: &[u8]) -> Result<()> {
        if hash.len() < self.min_bytes() {
            return Err(Error::InvalidHash(format!(
                "hash is too short: {} bytes, need at least {}",
                hash.len(),
                self.min_bytes()
            )));
        }
        Ok(())
    }

    /// Create every missing directory level for `hash`, outermost first.
    ///
    /// Concurrent creators are expected, so an existing level is not an
    /// error. With fsync enabled, each new level is made durable in its
    /// parent before the next level is created beneath it.
    pub(crate) fn create_dirs(&self, hash: &[u8]) -> Result<()> {
        let mut path = self.root.clone();
        for dir in self.dirs_for(hash) {
            let parent = path.clone();
            path.push(dir);
            match fs::create_dir(&path) {
                Ok(()) => {
                    if self.fsync {
                        sync_dir(&parent)?;
                    }
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// fsync a directory so its entries are durable
pub(crate) fn sync_dir(path: &Path) -> Result<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}
