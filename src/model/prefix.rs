//! Hex hash prefixes as typed by users

use crate::{Error, Result};

/// Decode a hex prefix into bytes.
///
/// An odd trailing digit is taken as a high nibble, so `"abc"` decodes to
/// `[0xab, 0xc0]`. Pair it with a bit count to say how much of it matters.
pub fn parse_prefix(text: &str) -> Result<Vec<u8>> {
    let padded = if text.len() % 2 == 1 {
        format!("{}0", text)
    } else {
        text.to_string()
    };
    hex::decode(&padded).map_err(|e| Error::InvalidHash(format!("prefix {:?}: {}", text, e)))
}
