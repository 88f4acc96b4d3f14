use std::fmt;

use log::{error, warn};
use serde::Serialize;

use crate::memory::{Memory, MemoryError, Word};
use crate::pic::InterruptLine;

/// Words per instruction: `[opcode, operand]`.
pub const INSTRUCTION_WORDS: u32 = 2;

pub const MOVA_OPCODE: Word = 0x10;
pub const MOVB_OPCODE: Word = MOVA_OPCODE + 1;
pub const MOVC_OPCODE: Word = MOVA_OPCODE + 2;
pub const JMP_OPCODE: Word = 0x20;
pub const INT_OPCODE: Word = 0x30;
pub const STA_OPCODE: Word = 0x40;
pub const STB_OPCODE: Word = STA_OPCODE + 1;
pub const STC_OPCODE: Word = STA_OPCODE + 2;

/// The live register file. Exactly one copy is live at a time: the CPU's own.
/// Processes keep a saved snapshot that is swapped in on a context switch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Registers {
    pub a: Word,
    pub b: Word,
    pub c: Word,
    /// Reserved; no instruction reads or writes it.
    pub flags: Word,
    pub ip: u32,
    /// Reserved; no instruction reads or writes it.
    pub sp: u32,
}

impl Registers {
    /// Fresh register file for a program whose first instruction is at `entry`.
    pub fn at_entry(entry: u32) -> Self {
        Self {
            ip: entry,
            ..Self::default()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reg {
    A,
    B,
    C,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::A => write!(f, "A"),
            Reg::B => write!(f, "B"),
            Reg::C => write!(f, "C"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// Load the operand into a register.
    Mov(Reg),
    /// Store a register at the operand address.
    St(Reg),
    /// Relative jump by the operand.
    Jmp,
    /// Raise the software interrupt line.
    Int,
}

impl Opcode {
    pub fn decode(word: Word) -> Option<Self> {
        match word {
            MOVA_OPCODE => Some(Opcode::Mov(Reg::A)),
            MOVB_OPCODE => Some(Opcode::Mov(Reg::B)),
            MOVC_OPCODE => Some(Opcode::Mov(Reg::C)),
            STA_OPCODE => Some(Opcode::St(Reg::A)),
            STB_OPCODE => Some(Opcode::St(Reg::B)),
            STC_OPCODE => Some(Opcode::St(Reg::C)),
            JMP_OPCODE => Some(Opcode::Jmp),
            INT_OPCODE => Some(Opcode::Int),
            _ => None,
        }
    }

    /// How far `ip` moves after the instruction completes. `None` when the
    /// instruction sets `ip` itself or leaves it to an interrupt handler.
    ///
    /// `STC` does not advance, unlike `STA`/`STB`. This is the documented
    /// machine behaviour; programs must not rely on falling through it.
    pub fn ip_advance(self) -> Option<u32> {
        match self {
            Opcode::Mov(_) | Opcode::St(Reg::A) | Opcode::St(Reg::B) => Some(INSTRUCTION_WORDS),
            Opcode::St(Reg::C) => Some(0),
            Opcode::Jmp | Opcode::Int => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Mov(reg) => write!(f, "MOV{reg}"),
            Opcode::St(reg) => write!(f, "ST{reg}"),
            Opcode::Jmp => write!(f, "JMP"),
            Opcode::Int => write!(f, "INT"),
        }
    }
}

/// Result of one fetch/decode/execute cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Executed(Opcode),
    /// The instruction requests `line`; the caller must run its handler
    /// before anything else happens on the machine.
    Interrupt(InterruptLine),
    /// Unrecognised opcode; it was skipped.
    InvalidOpcode { ip: u32, opcode: Word },
    /// The store target was outside memory; the store was skipped.
    StoreFault { ip: u32, address: Word },
    /// `ip` (or `ip + 1`) is outside memory; nothing was executed.
    FetchFault { ip: u32 },
}

#[derive(Clone, Debug, Default)]
pub struct Cpu {
    pub registers: Registers,
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute exactly one instruction. Never panics: bad opcodes and bad
    /// addresses are reported through the returned outcome.
    pub fn step(&mut self, memory: &mut Memory) -> StepOutcome {
        let ip = self.registers.ip;
        let (opcode, operand) = match fetch(memory, ip) {
            Ok(pair) => pair,
            Err(err) => {
                error!("instruction fetch at {ip} failed: {err}");
                return StepOutcome::FetchFault { ip };
            }
        };

        let Some(op) = Opcode::decode(opcode) else {
            warn!("invalid opcode {opcode:#x} at {ip}. Skipping...");
            self.advance(INSTRUCTION_WORDS);
            return StepOutcome::InvalidOpcode { ip, opcode };
        };

        let outcome = match op {
            Opcode::Mov(reg) => {
                *self.reg_mut(reg) = operand;
                StepOutcome::Executed(op)
            }
            Opcode::St(reg) => {
                let value = self.reg(reg);
                let stored = usize::try_from(operand)
                    .map_err(|_| MemoryError::OutOfRange {
                        index: usize::MAX,
                        len: memory.len(),
                    })
                    .and_then(|address| memory.write(address, value));
                match stored {
                    Ok(()) => StepOutcome::Executed(op),
                    Err(err) => {
                        warn!("{op} to {operand} at {ip} skipped: {err}");
                        StepOutcome::StoreFault {
                            ip,
                            address: operand,
                        }
                    }
                }
            }
            Opcode::Jmp => {
                self.registers.ip = ip.wrapping_add_signed(operand);
                StepOutcome::Executed(op)
            }
            Opcode::Int => StepOutcome::Interrupt(InterruptLine::Software),
        };
        if let Some(words) = op.ip_advance() {
            self.advance(words);
        }
        outcome
    }

    fn advance(&mut self, words: u32) {
        self.registers.ip = self.registers.ip.wrapping_add(words);
    }

    fn reg(&self, reg: Reg) -> Word {
        match reg {
            Reg::A => self.registers.a,
            Reg::B => self.registers.b,
            Reg::C => self.registers.c,
        }
    }

    fn reg_mut(&mut self, reg: Reg) -> &mut Word {
        match reg {
            Reg::A => &mut self.registers.a,
            Reg::B => &mut self.registers.b,
            Reg::C => &mut self.registers.c,
        }
    }
}

fn fetch(memory: &Memory, ip: u32) -> Result<(Word, Word), MemoryError> {
    let ip = ip as usize;
    let opcode = memory.read(ip)?;
    let operand = memory.read(ip.checked_add(1).ok_or(MemoryError::OutOfRange {
        index: ip,
        len: memory.len(),
    })?)?;
    Ok((opcode, operand))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with(program: &[Word]) -> (Cpu, Memory) {
        let mut memory = Memory::new(64).unwrap();
        memory.load(0, program).unwrap();
        (Cpu::new(), memory)
    }

    #[test]
    fn mov_loads_registers_and_advances() {
        let (mut cpu, mut mem) =
            machine_with(&[MOVA_OPCODE, 5, MOVB_OPCODE, -6, MOVC_OPCODE, 7]);
        for _ in 0..3 {
            assert!(matches!(cpu.step(&mut mem), StepOutcome::Executed(_)));
        }
        assert_eq!(
            cpu.registers,
            Registers {
                a: 5,
                b: -6,
                c: 7,
                ip: 6,
                ..Registers::default()
            }
        );
    }

    #[test]
    fn stores_write_memory_and_stc_keeps_ip() {
        let (mut cpu, mut mem) = machine_with(&[STA_OPCODE, 40, STB_OPCODE, 41, STC_OPCODE, 42]);
        cpu.registers.a = 1;
        cpu.registers.b = 2;
        cpu.registers.c = 3;
        cpu.step(&mut mem);
        assert_eq!(cpu.registers.ip, 2);
        cpu.step(&mut mem);
        assert_eq!(cpu.registers.ip, 4);
        assert_eq!(cpu.step(&mut mem), StepOutcome::Executed(Opcode::St(Reg::C)));
        assert_eq!(cpu.registers.ip, 4);
        assert_eq!(mem.slice(40..43).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn jmp_is_relative_to_its_own_address() {
        let (mut cpu, mut mem) = machine_with(&[0, 0, 0, 0, JMP_OPCODE, -4]);
        cpu.registers.ip = 4;
        cpu.step(&mut mem);
        assert_eq!(cpu.registers.ip, 0);
    }

    #[test]
    fn int_reports_software_line_without_moving_ip() {
        let (mut cpu, mut mem) = machine_with(&[INT_OPCODE, 0]);
        assert_eq!(
            cpu.step(&mut mem),
            StepOutcome::Interrupt(InterruptLine::Software)
        );
        assert_eq!(cpu.registers.ip, 0);
    }

    #[test]
    fn undefined_opcode_only_moves_ip() {
        let (mut cpu, mut mem) = machine_with(&[0x99, 1234]);
        let before = Registers {
            a: 1,
            b: 2,
            c: 3,
            flags: 4,
            ip: 0,
            sp: 6,
        };
        cpu.registers = before;
        assert_eq!(
            cpu.step(&mut mem),
            StepOutcome::InvalidOpcode { ip: 0, opcode: 0x99 }
        );
        assert_eq!(cpu.registers, Registers { ip: 2, ..before });
    }

    #[test]
    fn faults_are_reported_not_raised() {
        let (mut cpu, mut mem) = machine_with(&[STA_OPCODE, 1000, STB_OPCODE, -1]);
        assert_eq!(
            cpu.step(&mut mem),
            StepOutcome::StoreFault { ip: 0, address: 1000 }
        );
        assert_eq!(
            cpu.step(&mut mem),
            StepOutcome::StoreFault { ip: 2, address: -1 }
        );
        cpu.registers.ip = 63;
        assert_eq!(cpu.step(&mut mem), StepOutcome::FetchFault { ip: 63 });
    }
}
