use std::cmp::Reverse;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pic::{InterruptLine, Isr};
use crate::process::Process;

/// Scheduling policy, fixed for the lifetime of a kernel.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerPolicy {
    #[cfg_attr(feature = "cli", value(name = "fcfs", alias = "first-come-first-served"))]
    #[serde(alias = "fcfs")]
    FirstComeFirstServed,
    #[cfg_attr(feature = "cli", value(name = "sjf", alias = "shortest-job"))]
    #[serde(alias = "sjf")]
    ShortestJob,
    #[default]
    #[cfg_attr(feature = "cli", value(name = "rr", alias = "round-robin"))]
    #[serde(alias = "rr")]
    RoundRobin,
    #[cfg_attr(feature = "cli", value(name = "priority"))]
    Priority,
}

impl SchedulerPolicy {
    pub fn label(self) -> &'static str {
        match self {
            Self::FirstComeFirstServed => "first-come-first-served",
            Self::ShortestJob => "shortest-job",
            Self::RoundRobin => "round-robin",
            Self::Priority => "priority",
        }
    }

    /// Routine bound to `line` under this policy. Every policy unloads on the
    /// software line; only the time-sliced ones preempt on the timer.
    pub fn isr(self, line: InterruptLine) -> Isr {
        match (self, line) {
            (_, InterruptLine::Software) => Isr::Unload,
            (Self::RoundRobin | Self::Priority, InterruptLine::Timer) => Isr::Preempt,
            (Self::FirstComeFirstServed | Self::ShortestJob, InterruptLine::Timer) => Isr::Ignore,
        }
    }

    /// Process to run when nothing is running: at boot, or after the process at
    /// `vacated` was removed. `processes` must not be empty.
    pub fn pick(self, processes: &[Process], vacated: usize) -> usize {
        debug_assert!(!processes.is_empty());
        match self {
            Self::RoundRobin => vacated % processes.len(),
            // Arrival order is collection order.
            Self::FirstComeFirstServed => 0,
            Self::ShortestJob => processes
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| (p.job_len(), p.id))
                .map(|(index, _)| index)
                .unwrap_or(0),
            Self::Priority => processes
                .iter()
                .enumerate()
                .min_by_key(|(index, p)| (Reverse(p.priority), *index))
                .map(|(index, _)| index)
                .unwrap_or(0),
        }
    }

    /// Process to switch to once the running process at `current` has used its
    /// quantum. Returns `current` when it should keep the CPU.
    pub fn pick_preempted(self, processes: &[Process], current: usize) -> usize {
        let count = processes.len();
        if count < 2 {
            return current;
        }
        match self {
            Self::RoundRobin => (current + 1) % count,
            // Scan the others in rotation order, then `current` itself; the first
            // highest priority wins, so equal priorities take turns.
            Self::Priority => (1..=count)
                .map(|offset| (current + offset) % count)
                .min_by_key(|&index| {
                    let turn = (index + count - current - 1) % count;
                    (Reverse(processes[index].priority), turn)
                })
                .unwrap_or(current),
            Self::FirstComeFirstServed | Self::ShortestJob => current,
        }
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
