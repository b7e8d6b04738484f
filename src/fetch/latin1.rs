//! Byte-per-character content encoding used to carry binary files in JSON.
//!
//! Every byte `0x00..=0xFF` maps to the character with the same code point.

use derive_more::{Display, Error};

/// A character that doesn't fit into a single byte.
#[derive(Debug, Display, Error, PartialEq, Eq)]
#[display("character {ch:?} at offset {offset} is outside of the single-byte range")]
pub struct NonLatin1Char {
    pub ch: char,
    pub offset: usize,
}

/// Decodes `content` back into the raw bytes.
pub fn decode(content: &str) -> Result<Vec<u8>, NonLatin1Char> {
    content
        .char_indices()
        .map(|(offset, ch)| u8::try_from(ch).map_err(|_| NonLatin1Char { ch, offset }))
        .collect()
}

/// Encodes raw bytes the way the remote site does.
pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}
