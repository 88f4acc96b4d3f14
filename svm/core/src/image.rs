//! Executable images: raw little-endian 32-bit words, no header.

use std::fs;
use std::path::Path;

use log::warn;

use crate::memory::{Word, WORD_BYTES};

/// Decode an image. Trailing bytes that do not fill a whole word are dropped.
pub fn decode_words(bytes: &[u8]) -> Vec<Word> {
    bytes
        .chunks_exact(WORD_BYTES)
        .map(|chunk| Word::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn encode_words(words: &[Word]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// Read a whole image file.
pub fn load_image(path: &Path) -> std::io::Result<Vec<Word>> {
    let bytes = fs::read(path)?;
    let extra = bytes.len() % WORD_BYTES;
    if extra != 0 {
        warn!(
            "image {}: ignoring {extra} trailing byte(s) after {} words",
            path.display(),
            bytes.len() / WORD_BYTES
        );
    }
    Ok(decode_words(&bytes))
}

pub fn write_image(path: &Path, words: &[Word]) -> std::io::Result<()> {
    fs::write(path, encode_words(words))
}
