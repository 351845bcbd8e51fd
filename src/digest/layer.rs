//! A single memory-mapped layer of XOR slots

use crate::model::{Hash, HASH_LEN};
use crate::{Error, Result};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Layer files are sized in multiples of this
pub const PAGE_SIZE: u64 = 4096;

/// Largest prefix a layer may be keyed on
pub const MAX_PREFIX_BITS: u32 = 32;

/// Expected file size for a layer with `prefix_bits` of slot index
pub fn layer_file_size(prefix_bits: u32) -> u64 {
    let raw = (1u64 << prefix_bits) * HASH_LEN as u64;
    raw.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// One resolution level of the digest tree: `2^prefix_bits` slots of 32 bytes
pub struct Layer {
    path: PathBuf,
    prefix_bits: u32,
    map: MmapMut,
    _file: File,
}

impl Layer {
    /// Open or create the backing file and map it.
    ///
    /// A new or empty file is grown to the expected size. An existing file
    /// of any other non-zero size is refused.
    pub fn open(path: impl AsRef<Path>, prefix_bits: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if prefix_bits == 0 || prefix_bits > MAX_PREFIX_BITS {
            return Err(Error::Config(format!(
                "layer prefix of {} bits is outside 1..={}",
                prefix_bits, MAX_PREFIX_BITS
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let expected = layer_file_size(prefix_bits);
        let size = file.metadata()?.len();
        if size != expected {
            if size != 0 {
                return Err(Error::Config(format!(
                    "{} has size {} instead of {}",
                    path.display(),
                    size,
                    expected
                )));
            }
            tracing::info!(path = %path.display(), size = expected, "creating digest layer");
            file.set_len(expected)?;
            let actual = file.metadata()?.len();
            if actual != expected {
                return Err(Error::Config(format!(
                    "failed to grow {} from 0 to {} bytes",
                    path.display(),
                    expected
                )));
            }
        }

        // SAFETY: the file is opened read-write by this process and kept open
        // for the lifetime of the map. Every access goes through bounds-checked
        // slices of the map.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Layer {
            path,
            prefix_bits,
            map,
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of leading hash bits that select a slot
    pub fn prefix_bits(&self) -> u32 {
        self.prefix_bits
    }

    /// Number of slots in this layer
    pub fn slot_count(&self) -> u64 {
        1u64 << self.prefix_bits
    }

    /// Slot index a hash falls into
    pub fn slot_of(&self, hash: &Hash) -> u64 {
        hash.prefix_bits(self.prefix_bits) as u64
    }

    fn range(&self, slot: u64) -> Result<std::ops::Range<usize>> {
        if slot >= self.slot_count() {
            return Err(Error::InvalidHash(format!(
                "slot {} out of range for a {}-bit layer",
                slot, self.prefix_bits
            )));
        }
        let start = usize::try_from(slot * HASH_LEN as u64)
            .map_err(|_| Error::Config(format!("slot {} not addressable", slot)))?;
        Ok(start..start + HASH_LEN)
    }

    /// Read the accumulated XOR stored in `slot`
    pub fn read_slot(&self, slot: u64) -> Result<Hash> {
        let range = self.range(slot)?;
        let bytes = self
            .map
            .get(range)
            .and_then(Hash::from_slice)
            .ok_or_else(|| Error::Config(format!("{} is shorter than its slots", self.path.display())))?;
        Ok(bytes)
    }

    /// XOR `hash` into its slot in place
    pub fn xor_in(&mut self, hash: &Hash) -> Result<()> {
        let range = self.range(self.slot_of(hash))?;
        let path = &self.path;
        let slot = self
            .map
            .get_mut(range)
            .ok_or_else(|| Error::Config(format!("{} is shorter than its slots", path.display())))?;
        for (dst, src) in slot.iter_mut().zip(hash.as_bytes()) {
            *dst ^= src;
        }
        Ok(())
    }

    /// Flush dirty pages to the backing file
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_size_rounds_to_page() {
        assert_eq!(layer_file_size(4), PAGE_SIZE);
        assert_eq!(layer_file_size(7), PAGE_SIZE);
        assert_eq!(layer_file_size(8), 2 * PAGE_SIZE);
        assert_eq!(layer_file_size(12), 128 * 1024);
    }

    #[test]
    fn test_created_zero_filled() {
        let dir = tempdir().unwrap();
        let layer = Layer::open(dir.path().join("layer"), 4).unwrap();
        assert_eq!(layer.slot_count(), 16);
        for slot in 0..16 {
            assert!(layer.read_slot(slot).unwrap().is_zero());
        }
        assert_eq!(
            std::fs::metadata(layer.path()).unwrap().len(),
            layer_file_size(4)
        );
    }

    #[test]
    fn test_wrong_size_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layer");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        assert!(matches!(Layer::open(&path, 4), Err(Error::Config(_))));
        // the file is left alone
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
    }

    #[test]
    fn test_prefix_bounds() {
        let dir = tempdir().unwrap();
        assert!(Layer::open(dir.path().join("a"), 0).is_err());
        assert!(Layer::open(dir.path().join("b"), 33).is_err());
    }

    #[test]
    fn test_xor_in_place_and_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layer");
        let h = Hash::digest(b"persisted");

        {
            let mut layer = Layer::open(&path, 8).unwrap();
            layer.xor_in(&h).unwrap();
            assert_eq!(layer.read_slot(layer.slot_of(&h)).unwrap(), h);
            layer.flush().unwrap();
        }

        let layer = Layer::open(&path, 8).unwrap();
        assert_eq!(layer.read_slot(h.prefix_bits(8) as u64).unwrap(), h);
        assert!(layer.read_slot(256).is_err());
    }
}
