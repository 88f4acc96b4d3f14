use crate::cpu::Cpu;
use crate::memory::{Memory, MemoryError};
use crate::pic::Pic;

/// The bare hardware: memory, one CPU, the interrupt controller and a power
/// switch. Scheduling lives in the kernel.
#[derive(Clone, Debug)]
pub struct Machine {
    pub memory: Memory,
    pub cpu: Cpu,
    pub pic: Pic,
    running: bool,
}

impl Machine {
    pub fn new(memory_words: usize) -> Result<Self, MemoryError> {
        Ok(Self {
            memory: Memory::new(memory_words)?,
            cpu: Cpu::new(),
            pic: Pic::new(),
            running: false,
        })
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}
