//! Shard schema: how the leading bits of a hash map onto directory levels
//!
//! Each schema entry of `n` bits becomes one directory level named by
//! `ceil(n / 4)` hex digits. Bits are consumed from the most-significant end
//! of the hash. When `n` is not a multiple of four, the last digit holds the
//! remaining bits in its high positions with the low positions zeroed, so a
//! directory name is always a true hex prefix of the bits it covers.

use crate::{Error, Result};

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Ordered bit widths, one per directory level
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardSchema {
    bits: Vec<u8>,
    total_bits: u32,
}

impl ShardSchema {
    /// Create a schema from per-level bit widths
    pub fn new(bits: Vec<u8>) -> Result<Self> {
        if bits.is_empty() {
            return Err(Error::Config("shard schema needs at least one level".into()));
        }
        if bits.iter().any(|&b| b == 0 || b > 32) {
            return Err(Error::Config("shard levels must be 1 to 32 bits wide".into()));
        }
        let total_bits: u32 = bits.iter().map(|&b| b as u32).sum();
        if total_bits > 256 {
            return Err(Error::Config(format!(
                "shard schema covers {} bits, more than a hash holds",
                total_bits
            )));
        }
        Ok(ShardSchema { bits, total_bits })
    }

    /// Per-level bit widths
    pub fn levels(&self) -> &[u8] {
        &self.bits
    }

    /// Number of directory levels
    pub fn depth(&self) -> usize {
        self.bits.len()
    }

    /// Sum of all level widths
    pub fn total_bits(&self) -> u32 {
        self.total_bits
    }

    /// Minimum hash length in bytes needed to address a blob
    pub fn min_bytes(&self) -> usize {
        self.total_bits.div_ceil(8) as usize
    }

    /// Directory names for a hash, one per level, outermost first.
    ///
    /// The hash must hold at least `min_bytes()`; missing bits read as zero.
    pub fn dirs_for(&self, hash: &[u8]) -> Vec<String> {
        let mut reader = BitReader::new(hash);
        self.bits
            .iter()
            .map(|&n| {
                let mut remaining = n as u32;
                let mut name = String::with_capacity(n.div_ceil(4) as usize);
                while remaining > 0 {
                    let take = remaining.min(4);
                    let nibble = (reader.read(take) << (4 - take)) as usize;
                    name.push(HEX[nibble] as char);
                    remaining -= take;
                }
                name
            })
            .collect()
    }

    /// Bits of a scan prefix that are decided once `level + 1` directory
    /// levels have been walked: the cumulative schema width, clamped to the
    /// requested scan width. `level == depth()` addresses the leaf files.
    pub fn bits_at_depth(&self, scan_bits: u32) -> Vec<u32> {
        let mut cumulative = 0u32;
        let mut out: Vec<u32> = self
            .bits
            .iter()
            .map(|&b| {
                cumulative += b as u32;
                cumulative.min(scan_bits)
            })
            .collect();
        out.push(scan_bits);
        out
    }

    /// Decode one directory name at `level` back into its bit value.
    ///
    /// Returns `None` for names that could not have been produced by
    /// [`dirs_for`](Self::dirs_for) at that level.
    pub fn decode_dir(&self, level: usize, name: &str) -> Option<u32> {
        let width = *self.bits.get(level)? as u32;
        let digits = width.div_ceil(4) as usize;
        if name.len() != digits {
            return None;
        }
        let mut value: u64 = 0;
        for c in name.bytes() {
            let d = match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                _ => return None,
            };
            value = (value << 4) | d as u64;
        }
        let pad = digits as u32 * 4 - width;
        if value & ((1u64 << pad) - 1) != 0 {
            return None;
        }
        Some((value >> pad) as u32)
    }
}

/// Reads a byte slice as a big-endian bit stream
struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BitReader { bytes, pos: 0 }
    }

    /// Read up to 32 bits; bits past the end read as zero
    fn read(&mut self, count: u32) -> u32 {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self.bytes.get(self.pos / 8).copied().unwrap_or(0);
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        value
    }
}

/// Accumulates directory-level bit values back into a byte prefix
#[derive(Clone, Debug, Default)]
pub(crate) struct BitPrefix {
    bytes: Vec<u8>,
    len: u32,
}

impl BitPrefix {
    /// Append the low `width` bits of `value`, most-significant first
    pub(crate) fn push(&mut self, value: u32, width: u32) {
        for i in (0..width).rev() {
            let bit = ((value >> i) & 1) as u8;
            if self.len % 8 == 0 {
                self.bytes.push(0);
            }
            if bit == 1 {
                let idx = (self.len / 8) as usize;
                self.bytes[idx] |= 0x80 >> (self.len % 8);
            }
            self.len += 1;
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Compare the leading `bits` bits of two byte strings.
///
/// Whole bytes are compared first, then the remaining sub-byte bits. If both
/// inputs run out at the same point before `bits` is reached they match; if
/// only one runs out they do not.
pub fn compare_bits(a: &[u8], b: &[u8], bits: u32) -> bool {
    let full = (bits / 8) as usize;
    for i in 0..full {
        match (a.get(i), b.get(i)) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => {}
            _ => return false,
        }
    }
    let rem = bits % 8;
    if rem == 0 {
        return true;
    }
    match (a.get(full), b.get(full)) {
        (None, None) => true,
        (Some(x), Some(y)) => (x ^ y) >> (8 - rem) == 0,
        _ => false,
    }
}
