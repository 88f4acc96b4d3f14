use std::ops::Range;

use thiserror::Error;

/// Machine word: memory cells, registers and instruction fields are all one word.
pub type Word = i32;

/// Size of a word in an executable image.
pub const WORD_BYTES: usize = 4;
pub const DEFAULT_MEMORY_WORDS: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {index} is outside memory of {len} words")]
    OutOfRange { index: usize, len: usize },
    #[error("memory of {0} words cannot be addressed by a machine word")]
    TooLarge(usize),
}

/// Flat word-addressable RAM. Holds no allocation logic of its own.
#[derive(Clone, Debug)]
pub struct Memory {
    ram: Vec<Word>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            ram: vec![0; DEFAULT_MEMORY_WORDS],
        }
    }
}

impl Memory {
    pub fn new(words: usize) -> Result<Self, MemoryError> {
        if words > Word::MAX as usize {
            return Err(MemoryError::TooLarge(words));
        }
        Ok(Self {
            ram: vec![0; words],
        })
    }

    pub fn len(&self) -> usize {
        self.ram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ram.is_empty()
    }

    pub fn read(&self, index: usize) -> Result<Word, MemoryError> {
        self.ram
            .get(index)
            .copied()
            .ok_or(MemoryError::OutOfRange {
                index,
                len: self.ram.len(),
            })
    }

    pub fn write(&mut self, index: usize, value: Word) -> Result<(), MemoryError> {
        let len = self.ram.len();
        let cell = self
            .ram
            .get_mut(index)
            .ok_or(MemoryError::OutOfRange { index, len })?;
        *cell = value;
        Ok(())
    }

    /// Copy `words` into RAM starting at `start`. Nothing is written unless the
    /// whole run fits.
    pub fn load(&mut self, start: usize, words: &[Word]) -> Result<(), MemoryError> {
        let len = self.ram.len();
        let end = start
            .checked_add(words.len())
            .filter(|end| *end <= len)
            .ok_or(MemoryError::OutOfRange {
                index: start.saturating_add(words.len()),
                len,
            })?;
        self.ram[start..end].copy_from_slice(words);
        Ok(())
    }

    pub fn slice(&self, range: Range<usize>) -> Result<&[Word], MemoryError> {
        let len = self.ram.len();
        self.ram.get(range.clone()).ok_or(MemoryError::OutOfRange {
            index: range.end,
            len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut mem = Memory::new(8).unwrap();
        assert_eq!(
            mem.read(8),
            Err(MemoryError::OutOfRange { index: 8, len: 8 })
        );
        assert!(mem.write(9, 1).is_err());
        assert!(mem.load(6, &[1, 2, 3]).is_err());
        assert_eq!(mem.slice(0..8).unwrap(), &[0; 8]);
    }

    #[test]
    fn load_copies_whole_run() {
        let mut mem = Memory::new(8).unwrap();
        mem.load(5, &[7, 8, 9]).unwrap();
        assert_eq!(mem.slice(4..8).unwrap(), &[0, 7, 8, 9]);
    }
}
