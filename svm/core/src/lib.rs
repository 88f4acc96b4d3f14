//! A minimal multiprogramming machine.
//!
//! One three-register CPU executes two-word instructions out of a flat word
//! memory. A small kernel loads raw images as processes, places them with a
//! first-fit allocator whose free list lives inside memory itself, and shares
//! the CPU between them under one of four scheduling policies. The timer and
//! software interrupt lines drive preemption and process exit.

use thiserror::Error;

pub mod allocator;
pub mod config;
pub mod cpu;
pub mod image;
pub mod kernel;
pub mod machine;
pub mod memory;
pub mod pic;
pub mod process;
pub mod scheduler;

pub use allocator::{AllocError, FreeBlock, PhysicalAllocator, HEADER_WORDS};
pub use config::{ConfigError, ImageSpec, KernelConfig, DEFAULT_QUANTUM, DEFAULT_TIMER_PERIOD};
pub use cpu::{Cpu, Opcode, Reg, Registers, StepOutcome};
pub use kernel::{Kernel, KernelError, KernelStats, RunSummary};
pub use machine::Machine;
pub use memory::{Memory, MemoryError, Word, DEFAULT_MEMORY_WORDS, WORD_BYTES};
pub use pic::{InterruptLine, Isr, Pic};
pub use process::{Process, ProcessId, ProcessState};
pub use scheduler::SchedulerPolicy;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("allocator error: {0}")]
    Alloc(#[from] AllocError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
}

/// Boot a kernel from `config` and run it until the machine stops or
/// the step limit is reached.
pub fn boot_and_run(config: &KernelConfig) -> Result<RunSummary> {
    let mut kernel = Kernel::boot(config)?;
    Ok(kernel.run())
}
