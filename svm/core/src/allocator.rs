//! First-fit physical memory allocator.
//!
//! All bookkeeping lives inside the managed memory. Words `[0]` and `[1]` are the
//! free-list head sentinel: `[0]` links to the first free block and `[1]` holds the
//! number of free usable words. Every block, free or allocated, starts with a
//! two-word header `[next_free, size]` where `size` counts the usable words after
//! the header. Free blocks form a circular list through the sentinel, sorted by
//! index, which is what lets `free` coalesce by plain index arithmetic. Nothing
//! marks a block as allocated other than its absence from the list.

use thiserror::Error;

use crate::memory::{Memory, MemoryError, Word};

pub const HEADER_WORDS: usize = 2;
/// Header index of the free-list sentinel.
pub const SENTINEL: usize = 0;
/// Header index of the block that initially spans the whole pool.
pub const FIRST_BLOCK: usize = SENTINEL + HEADER_WORDS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("cannot allocate a zero-sized block")]
    ZeroSized,
    #[error("no free block can hold {requested} words ({available} words free in total)")]
    OutOfMemory { requested: usize, available: usize },
    #[error("memory of {0} words is too small to hold an allocator pool")]
    PoolTooSmall(usize),
    #[error("address {0} is not the start of an allocated block")]
    InvalidFree(usize),
    #[error("free list is corrupted near index {0}")]
    Corrupt(usize),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub type Result<T> = std::result::Result<T, AllocError>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FreeBlock {
    pub header: usize,
    pub size: usize,
}

impl FreeBlock {
    /// First usable index of the block.
    pub fn data(&self) -> usize {
        self.header + HEADER_WORDS
    }

    /// One past the last usable index.
    pub fn end(&self) -> usize {
        self.data() + self.size
    }
}

/// Allocator state that does not live in memory: the roving cursor.
#[derive(Clone, Debug)]
pub struct PhysicalAllocator {
    cursor: usize,
}

impl PhysicalAllocator {
    /// Lay out an empty pool over the whole of `memory`.
    pub fn init(memory: &mut Memory) -> Result<Self> {
        let len = memory.len();
        if len <= FIRST_BLOCK + HEADER_WORDS {
            return Err(AllocError::PoolTooSmall(len));
        }
        let free = len - FIRST_BLOCK - HEADER_WORDS;
        set_next(memory, SENTINEL, FIRST_BLOCK)?;
        set_size(memory, SENTINEL, free)?;
        set_next(memory, FIRST_BLOCK, SENTINEL)?;
        set_size(memory, FIRST_BLOCK, free)?;
        Ok(Self { cursor: SENTINEL })
    }

    /// Header index where the next search starts.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Reserve at least `units` contiguous words and return the index of the
    /// first one. The search starts after the cursor and takes the first block
    /// large enough; larger blocks are split and their tail handed out.
    pub fn allocate(&mut self, memory: &mut Memory, units: usize) -> Result<usize> {
        if units == 0 {
            return Err(AllocError::ZeroSized);
        }
        let start = self.cursor;
        let mut prev = start;
        let mut current = next(memory, prev)?;
        let mut budget = walk_budget(memory);

        loop {
            if current != SENTINEL {
                let size = size(memory, current)?;
                if size >= units {
                    let (data, taken) = if size > units + HEADER_WORDS {
                        let remaining = size - units - HEADER_WORDS;
                        set_size(memory, current, remaining)?;
                        let block = current + HEADER_WORDS + remaining;
                        set_next(memory, block, SENTINEL)?;
                        set_size(memory, block, units)?;
                        (block + HEADER_WORDS, units + HEADER_WORDS)
                    } else {
                        // Too small to split: the whole block goes, header and all.
                        let after = next(memory, current)?;
                        set_next(memory, prev, after)?;
                        set_next(memory, current, SENTINEL)?;
                        (current + HEADER_WORDS, size)
                    };
                    let free = size_of_pool(memory)?.saturating_sub(taken);
                    set_size(memory, SENTINEL, free)?;
                    self.cursor = prev;
                    return Ok(data);
                }
            }
            if current == start {
                return Err(AllocError::OutOfMemory {
                    requested: units,
                    available: size_of_pool(memory)?,
                });
            }
            budget = budget.checked_sub(1).ok_or(AllocError::Corrupt(current))?;
            prev = current;
            current = next(memory, current)?;
        }
    }

    /// Release the block whose data starts at `index`, merging it with the free
    /// blocks directly before and after it.
    pub fn free(&mut self, memory: &mut Memory, index: usize) -> Result<()> {
        if index < FIRST_BLOCK + HEADER_WORDS || index > memory.len() {
            return Err(AllocError::InvalidFree(index));
        }
        let block = index - HEADER_WORDS;
        let mut block_size = size(memory, block)?;
        if block_size == 0 || index + block_size > memory.len() {
            return Err(AllocError::InvalidFree(index));
        }

        // Find the free neighbours `prev < block < following`. Resume from the
        // cursor when the block lies past it; the sentinel is below everything.
        let mut prev = if self.cursor < block {
            self.cursor
        } else {
            SENTINEL
        };
        let mut budget = walk_budget(memory);
        let following = loop {
            let candidate = next(memory, prev)?;
            if candidate == block {
                return Err(AllocError::InvalidFree(index));
            }
            if candidate == SENTINEL || candidate > block {
                break candidate;
            }
            budget = budget.checked_sub(1).ok_or(AllocError::Corrupt(candidate))?;
            prev = candidate;
        };

        let prev_end = if prev == SENTINEL {
            FIRST_BLOCK
        } else {
            prev + HEADER_WORDS + size(memory, prev)?
        };
        if prev_end > block
            || (following != SENTINEL && index + block_size > following)
        {
            return Err(AllocError::InvalidFree(index));
        }

        let mut free = size_of_pool(memory)? + block_size;

        if following != SENTINEL && index + block_size == following {
            block_size += HEADER_WORDS + size(memory, following)?;
            set_size(memory, block, block_size)?;
            let after = next(memory, following)?;
            set_next(memory, block, after)?;
            free += HEADER_WORDS;
        } else {
            set_next(memory, block, following)?;
        }

        if prev != SENTINEL && prev_end == block {
            let merged = size(memory, prev)? + HEADER_WORDS + block_size;
            set_size(memory, prev, merged)?;
            let after = next(memory, block)?;
            set_next(memory, prev, after)?;
            free += HEADER_WORDS;
        } else {
            set_next(memory, prev, block)?;
        }

        set_size(memory, SENTINEL, free)?;
        self.cursor = prev;
        Ok(())
    }

    /// Total usable words on the free list, as recorded in the sentinel.
    pub fn free_words(&self, memory: &Memory) -> Result<usize> {
        size_of_pool(memory)
    }

    /// Free blocks in index order.
    pub fn free_blocks(&self, memory: &Memory) -> Result<Vec<FreeBlock>> {
        let mut blocks = Vec::new();
        let mut budget = walk_budget(memory);
        let mut current = next(memory, SENTINEL)?;
        while current != SENTINEL {
            blocks.push(FreeBlock {
                header: current,
                size: size(memory, current)?,
            });
            budget = budget.checked_sub(1).ok_or(AllocError::Corrupt(current))?;
            current = next(memory, current)?;
        }
        Ok(blocks)
    }
}

/// Upper bound on list length; every node takes at least a header.
fn walk_budget(memory: &Memory) -> usize {
    memory.len() / HEADER_WORDS + 1
}

fn size_of_pool(memory: &Memory) -> Result<usize> {
    size(memory, SENTINEL)
}

fn next(memory: &Memory, header: usize) -> Result<usize> {
    let link = to_index(memory.read(header)?, header)?;
    if link != SENTINEL && link + HEADER_WORDS > memory.len() {
        return Err(AllocError::Corrupt(header));
    }
    Ok(link)
}

fn size(memory: &Memory, header: usize) -> Result<usize> {
    to_index(memory.read(header + 1)?, header)
}

fn set_next(memory: &mut Memory, header: usize, link: usize) -> Result<()> {
    memory.write(header, link as Word)?;
    Ok(())
}

fn set_size(memory: &mut Memory, header: usize, size: usize) -> Result<()> {
    memory.write(header + 1, size as Word)?;
    Ok(())
}

fn to_index(word: Word, header: usize) -> Result<usize> {
    usize::try_from(word).map_err(|_| AllocError::Corrupt(header))
}
