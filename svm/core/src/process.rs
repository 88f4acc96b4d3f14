use serde::Serialize;

use crate::allocator::HEADER_WORDS;
use crate::cpu::Registers;

pub type ProcessId = u16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Ready,
    Running,
}

/// A loaded program. Terminated processes are removed from the kernel, so they
/// have no state of their own.
#[derive(Clone, Debug, Serialize)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub priority: u8,
    /// Allocator header index of the image block.
    pub memory_start_position: usize,
    /// One past the last image word.
    pub memory_end_position: usize,
    /// Saved register file. Stale while the process is running: the CPU holds
    /// the live copy until the next context switch writes it back.
    pub registers: Registers,
    pub state: ProcessState,
}

impl Process {
    /// New ready process whose image occupies `data_start..data_start + len`.
    pub fn new(id: ProcessId, name: String, priority: u8, data_start: usize, len: usize) -> Self {
        Self {
            id,
            name,
            priority,
            memory_start_position: data_start - HEADER_WORDS,
            memory_end_position: data_start + len,
            registers: Registers::at_entry(data_start as u32),
            state: ProcessState::Ready,
        }
    }

    /// Index of the first image word, as returned by the allocator.
    pub fn data_start(&self) -> usize {
        self.memory_start_position + HEADER_WORDS
    }

    /// Image length in words; the job size used by shortest-job scheduling.
    pub fn job_len(&self) -> usize {
        self.memory_end_position - self.data_start()
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}
