//! Process manager and interrupt service routines.
//!
//! The kernel owns the machine, every process and the allocator state. The CPU's
//! register file is the one live copy; a process's saved registers are only
//! authoritative while it is not running. Interrupt routines run to completion
//! inside [`Kernel::raise`], so a raise issued from the run loop or from the CPU
//! finishes before the next instruction is fetched.

use std::path::PathBuf;

use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::allocator::{AllocError, PhysicalAllocator};
use crate::config::{ConfigError, ImageSpec, KernelConfig};
use crate::cpu::{Registers, StepOutcome};
use crate::image::load_image;
use crate::machine::Machine;
use crate::memory::{MemoryError, Word};
use crate::pic::{InterruptLine, Isr};
use crate::process::{Process, ProcessId, ProcessState};
use crate::scheduler::SchedulerPolicy;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("the maximum number of processes has been reached")]
    ProcessLimit,
    #[error("failed to read program file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("program {0} is empty")]
    EmptyImage(String),
    #[error("not enough physical memory for {name}: {source}")]
    OutOfMemory {
        name: String,
        #[source]
        source: AllocError,
    },
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Counters accumulated over the kernel's lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KernelStats {
    pub steps: u64,
    pub timer_ticks: u64,
    pub context_switches: u64,
    pub terminated: u64,
    pub invalid_opcodes: u64,
    pub faults: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub policy: SchedulerPolicy,
    /// Whether the machine stopped because every process terminated.
    pub halted: bool,
    pub remaining: Vec<ProcessId>,
    pub free_words: usize,
    pub stats: KernelStats,
}

pub struct Kernel {
    machine: Machine,
    processes: Vec<Process>,
    policy: SchedulerPolicy,
    allocator: PhysicalAllocator,
    next_pid: ProcessId,
    current: Option<usize>,
    cycles_since_preemption: u32,
    quantum: u32,
    timer_period: u64,
    max_steps: Option<u64>,
    stats: KernelStats,
}

impl Kernel {
    /// Build an idle kernel: memory laid out for the allocator, interrupt lines
    /// bound for `config.policy`, no processes, machine stopped.
    pub fn new(config: &KernelConfig) -> Result<Self> {
        config.validate()?;
        let mut machine = Machine::new(config.memory_words)?;
        let allocator = PhysicalAllocator::init(&mut machine.memory)?;
        for line in InterruptLine::ALL {
            let isr = config.policy.isr(line);
            debug!("binding {line} to {isr:?}");
            machine.pic.install(line, isr);
        }
        Ok(Self {
            machine,
            processes: Vec::new(),
            policy: config.policy,
            allocator,
            next_pid: 0,
            current: None,
            cycles_since_preemption: 0,
            quantum: config.quantum,
            timer_period: config.timer_period,
            max_steps: config.max_steps,
            stats: KernelStats::default(),
        })
    }

    /// Build a kernel, load every configured image in order and start the
    /// machine on the policy's first choice. Images that fail to load are
    /// reported and skipped; with none loaded the machine stays stopped.
    pub fn boot(config: &KernelConfig) -> Result<Self> {
        let mut kernel = Self::new(config)?;
        for image in &config.images {
            if let Err(err) = kernel.load_image_spec(image) {
                error!("failed to create a process from {}: {err}", image.path.display());
            }
        }
        if kernel.processes.is_empty() {
            warn!("no processes were loaded; the machine stays stopped");
        } else {
            let first = kernel.policy.pick(&kernel.processes, 0);
            kernel.dispatch(first);
            kernel.machine.start();
        }
        info!(
            "booted with {} process(es) under {} scheduling",
            kernel.processes.len(),
            kernel.policy
        );
        Ok(kernel)
    }

    /// Load the image at `image.path` as a new process. If nothing is running,
    /// the new process is dispatched and the machine started; otherwise it
    /// waits in the ready state.
    pub fn create_process(&mut self, image: &ImageSpec) -> Result<ProcessId> {
        let index = self.load_image_spec(image)?;
        Ok(self.admit(index))
    }

    /// Like [`Kernel::create_process`] with the image already in memory.
    pub fn create_process_from_words(
        &mut self,
        name: impl Into<String>,
        words: &[Word],
        priority: u8,
    ) -> Result<ProcessId> {
        let index = self.load_words(name.into(), words, priority)?;
        Ok(self.admit(index))
    }

    /// Raise `line` and run its routine to completion.
    pub fn raise(&mut self, line: InterruptLine) {
        match self.machine.pic.acknowledge(line) {
            Isr::Ignore => debug!("{line} raised; no routine bound"),
            Isr::Preempt => self.preempt(),
            Isr::Unload => self.unload(),
        }
    }

    /// Execute one instruction and service whatever it raised.
    pub fn step(&mut self) -> StepOutcome {
        let outcome = self.machine.cpu.step(&mut self.machine.memory);
        self.stats.steps += 1;
        match outcome {
            StepOutcome::Interrupt(line) => self.raise(line),
            StepOutcome::InvalidOpcode { .. } => self.stats.invalid_opcodes += 1,
            StepOutcome::StoreFault { .. } => self.stats.faults += 1,
            StepOutcome::FetchFault { ip } => {
                self.stats.faults += 1;
                if let Some(process) = self.running_process() {
                    error!(
                        "process {} left memory (ip {ip}); terminating it",
                        process.id
                    );
                }
                self.unload();
            }
            StepOutcome::Executed(_) => {}
        }
        outcome
    }

    /// The run loop: step until the machine stops or the step limit is hit,
    /// raising the timer line every `timer_period` steps.
    pub fn run(&mut self) -> RunSummary {
        let mut steps = 0u64;
        while self.machine.is_running() {
            if self.max_steps.is_some_and(|max| steps >= max) {
                info!("step limit of {steps} reached");
                break;
            }
            self.step();
            steps += 1;
            if self.machine.is_running() && steps % self.timer_period == 0 {
                self.stats.timer_ticks += 1;
                self.raise(InterruptLine::Timer);
            }
        }
        self.summary()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            policy: self.policy,
            halted: !self.machine.is_running() && self.processes.is_empty(),
            remaining: self.processes.iter().map(|p| p.id).collect(),
            free_words: self.free_words().unwrap_or(0),
            stats: self.stats.clone(),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn registers(&self) -> &Registers {
        &self.machine.cpu.registers
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn policy(&self) -> SchedulerPolicy {
        self.policy
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    /// Index into [`Kernel::processes`] of the running process.
    pub fn running_index(&self) -> Option<usize> {
        self.current
    }

    pub fn running_process(&self) -> Option<&Process> {
        self.current.and_then(|index| self.processes.get(index))
    }

    pub fn cycles_since_preemption(&self) -> u32 {
        self.cycles_since_preemption
    }

    pub fn stats(&self) -> &KernelStats {
        &self.stats
    }

    pub fn allocator(&self) -> &PhysicalAllocator {
        &self.allocator
    }

    pub fn free_words(&self) -> Result<usize> {
        Ok(self.allocator.free_words(&self.machine.memory)?)
    }

    fn load_image_spec(&mut self, image: &ImageSpec) -> Result<usize> {
        self.check_pid()?;
        let words = load_image(&image.path).map_err(|source| KernelError::Io {
            path: image.path.clone(),
            source,
        })?;
        self.load_words(image.path.display().to_string(), &words, image.priority)
    }

    /// Copy `words` into a fresh block and register the process as ready.
    /// Returns its index in the process collection.
    fn load_words(&mut self, name: String, words: &[Word], priority: u8) -> Result<usize> {
        self.check_pid()?;
        if words.is_empty() {
            return Err(KernelError::EmptyImage(name));
        }
        let data = self
            .allocator
            .allocate(&mut self.machine.memory, words.len())
            .map_err(|source| match source {
                AllocError::OutOfMemory { .. } => KernelError::OutOfMemory {
                    name: name.clone(),
                    source,
                },
                other => other.into(),
            })?;
        if let Err(err) = self.machine.memory.load(data, words) {
            self.allocator.free(&mut self.machine.memory, data)?;
            return Err(err.into());
        }

        let id = self.next_pid;
        self.next_pid += 1;
        let process = Process::new(id, name, priority, data, words.len());
        info!(
            "created process {id} ({}) in [{}, {})",
            process.name, process.memory_start_position, process.memory_end_position
        );
        self.processes.push(process);
        Ok(self.processes.len() - 1)
    }

    fn check_pid(&self) -> Result<()> {
        if self.next_pid == ProcessId::MAX {
            return Err(KernelError::ProcessLimit);
        }
        Ok(())
    }

    /// Hand the CPU to a newly loaded process when it is otherwise idle.
    fn admit(&mut self, index: usize) -> ProcessId {
        if self.current.is_none() {
            self.dispatch(index);
            self.machine.start();
        }
        self.processes[index].id
    }

    /// Load `index` into the CPU. Only valid when no process holds the live
    /// registers, i.e. right after boot or after the running process was removed.
    fn dispatch(&mut self, index: usize) {
        let process = &mut self.processes[index];
        process.state = ProcessState::Running;
        self.machine.cpu.registers = process.registers;
        self.current = Some(index);
        self.cycles_since_preemption = 0;
        // Address translation would switch to the process's page table here.
    }

    /// Save the live registers into `from` and load `to`, as one operation.
    fn context_switch(&mut self, from: usize, to: usize) {
        let outgoing = &mut self.processes[from];
        outgoing.registers = self.machine.cpu.registers;
        outgoing.state = ProcessState::Ready;
        let from_id = outgoing.id;

        let incoming = &mut self.processes[to];
        self.machine.cpu.registers = incoming.registers;
        incoming.state = ProcessState::Running;
        self.current = Some(to);
        self.stats.context_switches += 1;
        info!("switching the context from process {from_id} to process {}", incoming.id);
    }

    fn preempt(&mut self) {
        let Some(current) = self.current else {
            return;
        };
        self.cycles_since_preemption += 1;
        if self.cycles_since_preemption <= self.quantum {
            debug!(
                "process {} keeps running, cycle {}",
                self.processes[current].id, self.cycles_since_preemption
            );
            return;
        }
        let next = self.policy.pick_preempted(&self.processes, current);
        if next != current {
            self.context_switch(current, next);
        }
        self.cycles_since_preemption = 0;
    }

    fn unload(&mut self) {
        let Some(current) = self.current.take() else {
            warn!("software interrupt with no running process");
            return;
        };
        let process = self.processes.remove(current);
        info!("unloading the process {}", process.id);
        if let Err(err) = self
            .allocator
            .free(&mut self.machine.memory, process.data_start())
        {
            error!("failed to release memory of process {}: {err}", process.id);
        }
        self.stats.terminated += 1;

        if self.processes.is_empty() {
            info!("no more processes. Stopping the machine.");
            self.cycles_since_preemption = 0;
            self.machine.stop();
            return;
        }
        let next = self.policy.pick(&self.processes, current);
        info!("switching the context to process {}", self.processes[next].id);
        self.dispatch(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{INT_OPCODE, MOVA_OPCODE};

    #[test]
    fn creation_fails_once_pids_run_out() {
        let mut kernel = Kernel::new(&KernelConfig::default()).unwrap();
        kernel.next_pid = ProcessId::MAX - 1;
        let id = kernel
            .create_process_from_words("last", &[INT_OPCODE, 0], 0)
            .unwrap();
        assert_eq!(id, ProcessId::MAX - 1);
        let free = kernel.free_words().unwrap();
        assert!(matches!(
            kernel.create_process_from_words("one-too-many", &[INT_OPCODE, 0], 0),
            Err(KernelError::ProcessLimit)
        ));
        assert_eq!(kernel.free_words().unwrap(), free);
        assert_eq!(kernel.processes().len(), 1);
    }

    #[test]
    fn later_processes_do_not_steal_the_cpu() {
        let mut kernel = Kernel::new(&KernelConfig::default()).unwrap();
        kernel
            .create_process_from_words("first", &[MOVA_OPCODE, 1, INT_OPCODE, 0], 0)
            .unwrap();
        let first_ip = kernel.registers().ip;
        kernel.step();
        kernel
            .create_process_from_words("second", &[INT_OPCODE, 0], 0)
            .unwrap();
        assert_eq!(kernel.registers().ip, first_ip + 2);
        assert_eq!(kernel.registers().a, 1);
        assert_eq!(kernel.processes()[1].state, ProcessState::Ready);
        assert!(kernel.machine().is_running());
    }

    #[test]
    fn timer_is_ignored_without_processes() {
        let mut kernel = Kernel::new(&KernelConfig::default()).unwrap();
        for _ in 0..500 {
            kernel.raise(InterruptLine::Timer);
        }
        assert_eq!(kernel.cycles_since_preemption(), 0);
        kernel.raise(InterruptLine::Software);
        assert!(!kernel.machine().is_running());
    }
}
