//! Layered XOR accumulator over hash prefixes

use super::layer::{Layer, MAX_PREFIX_BITS};
use crate::model::Hash;
use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Lock file held for as long as a tree is open
pub const LOCK_FILE: &str = "LOCK";

/// A stack of layers keyed on increasingly long hash prefixes.
///
/// Layer `i` keys its slots on the top `(i + 1) * layer_bits` bits (capped
/// at 32). Each slot holds the XOR of every hash added under that prefix.
///
/// XOR is self-inverse: adding the same hash twice cancels it out again.
/// Callers must add each hash at most once; the tree cannot detect a repeat.
///
/// An open tree holds an exclusive advisory lock on `root/LOCK`, so a second
/// process (or a second open in this one) cannot map the same layers.
pub struct DigestTree {
    root: PathBuf,
    layer_bits: u32,
    layers: Vec<Layer>,
    _lock: File,
}

impl DigestTree {
    /// Open or create `layer_count` layers under `root`
    pub fn open(root: impl AsRef<Path>, layer_count: u32, layer_bits: u32) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if layer_count == 0 || layer_bits == 0 {
            return Err(Error::Config(format!(
                "digest tree needs at least one layer of at least one bit (got {} x {})",
                layer_count, layer_bits
            )));
        }
        std::fs::create_dir_all(&root)?;
        let lock = Self::lock(&root)?;

        let layers = (0..layer_count)
            .map(|i| {
                let prefix_bits = ((i + 1) * layer_bits).min(MAX_PREFIX_BITS);
                let path = root.join(Self::layer_file_name(layer_bits, i));
                Layer::open(&path, prefix_bits)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DigestTree {
            root,
            layer_bits,
            layers,
            _lock: lock,
        })
    }

    fn lock(root: &Path) -> Result<File> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if is_contended(&e) => Err(Error::Locked(root.display().to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// File name of layer `index`: `xors-<layer_bits>-layer-<index>`
    pub fn layer_file_name(layer_bits: u32, index: u32) -> String {
        format!("xors-{}-layer-{}", layer_bits, index)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Bits per layer
    pub fn layer_bits(&self) -> u32 {
        self.layer_bits
    }

    /// Prefix length of the finest layer
    pub fn depth(&self) -> u32 {
        self.finest().prefix_bits()
    }

    fn finest(&self) -> &Layer {
        // open() guarantees at least one layer
        &self.layers[self.layers.len() - 1]
    }

    /// XOR `hash` into its slot on every layer
    pub fn add(&mut self, hash: &Hash) -> Result<()> {
        for layer in &mut self.layers {
            layer.xor_in(hash)?;
        }
        Ok(())
    }

    /// Accumulated XOR of the finest-layer bucket `hash` falls into
    pub fn get_leaf(&self, hash: &Hash) -> Result<Hash> {
        let finest = self.finest();
        finest.read_slot(finest.slot_of(hash))
    }

    /// Flush every layer to disk
    pub fn flush(&self) -> Result<()> {
        for layer in &self.layers {
            layer.flush()?;
        }
        Ok(())
    }

    /// Flush and unmap every layer
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for DigestTree {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::layer::layer_file_size;
    use crate::store::compare_bits;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_layer_files() {
        let dir = tempdir().unwrap();
        let tree = DigestTree::open(dir.path(), 3, 4).unwrap();
        assert_eq!(tree.depth(), 12);

        for (i, bits) in [4u32, 8, 12].iter().enumerate() {
            let path = dir.path().join(format!("xors-4-layer-{}", i));
            assert_eq!(std::fs::metadata(&path).unwrap().len(), layer_file_size(*bits));
            assert_eq!(tree.layers()[i].prefix_bits(), *bits);
        }
    }

    #[test]
    fn test_prefix_capped_at_32_bits() {
        let dir = tempdir().unwrap();
        let tree = DigestTree::open(dir.path(), 3, 12).unwrap();
        let bits: Vec<u32> = tree.layers().iter().map(|l| l.prefix_bits()).collect();
        assert_eq!(bits, vec![12, 24, 32]);
        assert_eq!(tree.depth(), 32);
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempdir().unwrap();
        assert!(matches!(DigestTree::open(dir.path(), 0, 4), Err(Error::Config(_))));
        assert!(matches!(DigestTree::open(dir.path(), 2, 0), Err(Error::Config(_))));
    }

    #[test]
    fn test_mismatched_layer_is_fatal() {
        let dir = tempdir().unwrap();
        DigestTree::open(dir.path(), 2, 4).unwrap().close().unwrap();

        // a truncated layer file is refused rather than resized
        std::fs::write(dir.path().join("xors-4-layer-1"), vec![1u8; 10]).unwrap();
        assert!(matches!(DigestTree::open(dir.path(), 2, 4), Err(Error::Config(_))));
    }

    #[test]
    fn test_double_add_cancels() {
        let dir = tempdir().unwrap();
        let mut tree = DigestTree::open(dir.path(), 2, 4).unwrap();
        let h = Hash::digest(b"twice");

        tree.add(&h).unwrap();
        assert_eq!(tree.get_leaf(&h).unwrap(), h);
        tree.add(&h).unwrap();
        assert!(tree.get_leaf(&h).unwrap().is_zero());
    }

    #[test]
    fn test_coarse_layers_aggregate_fine_ones() {
        let dir = tempdir().unwrap();
        let mut tree = DigestTree::open(dir.path(), 2, 4).unwrap();
        let hashes: Vec<Hash> = (0..100).map(|i| Hash::digest(format!("{}", i).as_bytes())).collect();
        for h in &hashes {
            tree.add(h).unwrap();
        }

        let slot = |layer: usize, h: &Hash| {
            let layer = &tree.layers()[layer];
            layer.read_slot(layer.slot_of(h)).unwrap()
        };
        let first = hashes[0];
        let mut coarse = Hash::ZERO;
        for fine in 0..16u32 {
            let mut bytes = *first.as_bytes();
            bytes[0] = (bytes[0] & 0xf0) | fine as u8;
            coarse ^= slot(1, &Hash::from_bytes(bytes));
        }
        assert_eq!(coarse, slot(0, &first));
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let tree = DigestTree::open(dir.path(), 2, 4).unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
        assert!(matches!(DigestTree::open(dir.path(), 2, 4), Err(Error::Locked(_))));

        drop(tree);
        DigestTree::open(dir.path(), 2, 4).unwrap();
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = tempdir().unwrap();
        let h = Hash::digest(b"durable");
        {
            let mut tree = DigestTree::open(dir.path(), 2, 4).unwrap();
            tree.add(&h).unwrap();
            tree.close().unwrap();
        }
        let tree = DigestTree::open(dir.path(), 2, 4).unwrap();
        assert_eq!(tree.get_leaf(&h).unwrap(), h);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_leaf_is_xor_of_bucket(seeds in proptest::collection::btree_set(any::<u64>(), 1..64)) {
            let dir = tempdir().unwrap();
            let mut tree = DigestTree::open(dir.path(), 2, 3).unwrap();
            let hashes: Vec<Hash> = seeds.iter().map(|s| Hash::digest(&s.to_le_bytes())).collect();
            for h in &hashes {
                tree.add(h).unwrap();
            }
            for target in &hashes {
                let expected = hashes
                    .iter()
                    .filter(|h| compare_bits(target.as_ref(), h.as_ref(), tree.depth()))
                    .fold(Hash::ZERO, |acc, h| acc ^ *h);
                prop_assert_eq!(tree.get_leaf(target).unwrap(), expected);
            }
        }
    }
}
