//! Lazy prefix-restricted walk over the shard directories

use crate::model::Hash;
use crate::store::content_store::ContentStore;
use crate::store::schema::{compare_bits, BitPrefix};
use crate::Result;
use std::fs::{self, ReadDir};
use std::path::Path;

/// One open directory on the walk stack
struct Frame {
    entries: ReadDir,
    /// Number of directory levels above the entries of this frame
    level: usize,
    /// Bits spelled out by the directory names leading here
    prefix: BitPrefix,
}

/// Depth-first iterator over stored hashes matching a bit prefix.
///
/// At each level only the bits already fixed by the cumulative schema width
/// (clamped to the scan width) are compared; a mismatch prunes the whole
/// subtree. Entries whose names could not have been produced by the schema
/// are skipped. I/O errors are yielded in place and the walk continues with
/// the next entry.
pub struct Scan<'a> {
    store: &'a ContentStore,
    prefix: Vec<u8>,
    bits_at_depth: Vec<u32>,
    stack: Vec<Frame>,
    pending_root: bool,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(store: &'a ContentStore, prefix: &[u8], bits: u32) -> Self {
        Scan {
            store,
            prefix: prefix.to_vec(),
            bits_at_depth: store.schema().bits_at_depth(bits),
            stack: Vec::new(),
            pending_root: true,
        }
    }

    fn open(&mut self, path: &Path, level: usize, prefix: BitPrefix) -> Result<()> {
        let entries = fs::read_dir(path)?;
        self.stack.push(Frame {
            entries,
            level,
            prefix,
        });
        Ok(())
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = Result<Hash>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending_root {
            self.pending_root = false;
            let root = self.store.root().to_path_buf();
            if let Err(e) = self.open(&root, 0, BitPrefix::default()) {
                return Some(Err(e));
            }
        }

        let store: &'a ContentStore = self.store;
        let schema = store.schema();
        let leaf_level = schema.depth();

        loop {
            let frame = self.stack.last_mut()?;
            let entry = match frame.entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.stack.pop();
                    continue;
                }
            };
            let level = frame.level;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => return Some(Err(e.into())),
            };

            if level < leaf_level {
                if !file_type.is_dir() {
                    continue;
                }
                let Some(value) = schema.decode_dir(level, name) else {
                    continue;
                };
                let mut prefix = frame.prefix.clone();
                prefix.push(value, schema.levels()[level] as u32);
                if !compare_bits(&self.prefix, prefix.as_bytes(), self.bits_at_depth[level]) {
                    continue;
                }
                if let Err(e) = self.open(&entry.path(), level + 1, prefix) {
                    return Some(Err(e));
                }
            } else {
                if file_type.is_dir() {
                    continue;
                }
                let Some(hash) = hex::decode(name).ok().and_then(|b| Hash::from_slice(&b)) else {
                    continue;
                };
                if compare_bits(&self.prefix, hash.as_ref(), self.bits_at_depth[leaf_level]) {
                    return Some(Ok(hash));
                }
            }
        }
    }
}
