//! Content-addressed hash type using SHA-256

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of bytes in a content hash
pub const HASH_LEN: usize = 32;

/// A 32-byte SHA-256 hash used for content addressing.
///
/// Serializes as a lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// The zero hash, also the XOR identity
    pub const ZERO: Hash = Hash([0u8; HASH_LEN]);

    /// Create a hash from raw bytes
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }

    /// Create a hash from a slice, which must be exactly 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }

    /// Hash arbitrary data
    pub fn digest(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Hash(arr))
    }

    /// Get a short prefix for display (first 7 chars, like git)
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }

    /// Check if this is the zero hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// XOR this hash into a 32-byte accumulator in place
    pub fn xor_into(&self, acc: &mut [u8; HASH_LEN]) {
        for (a, b) in acc.iter_mut().zip(self.0.iter()) {
            *a ^= b;
        }
    }

    /// Byte-wise XOR of two hashes
    pub fn xor(&self, other: &Hash) -> Hash {
        let mut out = other.0;
        self.xor_into(&mut out);
        Hash(out)
    }

    /// The top `bits` bits (at most 32) as a big-endian unsigned integer.
    ///
    /// `prefix_bits(0)` is always 0.
    pub fn prefix_bits(&self, bits: u32) -> u32 {
        debug_assert!(bits <= 32, "prefix wider than 32 bits");
        let top = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        top.checked_shr(32 - bits.min(32)).unwrap_or(0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::BitXor for Hash {
    type Output = Hash;

    fn bitxor(self, rhs: Hash) -> Hash {
        self.xor(&rhs)
    }
}

impl std::ops::BitXorAssign for Hash {
    fn bitxor_assign(&mut self, rhs: Hash) {
        rhs.xor_into(&mut self.0);
    }
}
