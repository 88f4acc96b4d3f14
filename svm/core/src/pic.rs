//! Programmable interrupt controller.
//!
//! The controller only records which kernel routine is bound to each line. The
//! kernel raises a line and runs the bound routine before returning to its
//! caller, so dispatch stays synchronous on the single thread of control.

use std::fmt;

use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptLine {
    /// Periodic tick raised by the run loop.
    Timer,
    /// Raised by the CPU on the `INT` instruction.
    Software,
}

impl InterruptLine {
    pub const ALL: [InterruptLine; 2] = [InterruptLine::Timer, InterruptLine::Software];

    /// Hardware line number.
    pub fn number(self) -> u8 {
        match self {
            InterruptLine::Timer => 0,
            InterruptLine::Software => 3,
        }
    }

    fn slot(self) -> usize {
        match self {
            InterruptLine::Timer => 0,
            InterruptLine::Software => 1,
        }
    }
}

impl fmt::Display for InterruptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptLine::Timer => write!(f, "timer(isr_{})", self.number()),
            InterruptLine::Software => write!(f, "software(isr_{})", self.number()),
        }
    }
}

/// Kernel routines a line can be bound to.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Isr {
    #[default]
    Ignore,
    /// Count the tick against the quantum and switch context once it is spent.
    Preempt,
    /// Terminate the running process and release its memory.
    Unload,
}

#[derive(Clone, Debug, Default)]
pub struct Pic {
    handlers: [Isr; 2],
    raised: [u64; 2],
}

impl Pic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `isr` to `line`, replacing any earlier binding.
    pub fn install(&mut self, line: InterruptLine, isr: Isr) {
        self.handlers[line.slot()] = isr;
    }

    pub fn handler(&self, line: InterruptLine) -> Isr {
        self.handlers[line.slot()]
    }

    /// Record a raise of `line` and return the routine to run for it.
    pub fn acknowledge(&mut self, line: InterruptLine) -> Isr {
        let slot = line.slot();
        self.raised[slot] = self.raised[slot].wrapping_add(1);
        self.handlers[slot]
    }

    /// Number of times `line` has been raised.
    pub fn raised(&self, line: InterruptLine) -> u64 {
        self.raised[line.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_rebinds_a_single_line() {
        let mut pic = Pic::new();
        assert_eq!(pic.handler(InterruptLine::Timer), Isr::Ignore);
        pic.install(InterruptLine::Timer, Isr::Preempt);
        pic.install(InterruptLine::Timer, Isr::Unload);
        assert_eq!(pic.handler(InterruptLine::Timer), Isr::Unload);
        assert_eq!(pic.handler(InterruptLine::Software), Isr::Ignore);
    }

    #[test]
    fn acknowledge_counts_raises() {
        let mut pic = Pic::new();
        pic.install(InterruptLine::Software, Isr::Unload);
        assert_eq!(pic.acknowledge(InterruptLine::Software), Isr::Unload);
        assert_eq!(pic.acknowledge(InterruptLine::Software), Isr::Unload);
        assert_eq!(pic.raised(InterruptLine::Software), 2);
        assert_eq!(pic.raised(InterruptLine::Timer), 0);
    }
}
