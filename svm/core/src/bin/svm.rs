use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use svm_core::{boot_and_run, ImageSpec, KernelConfig, SchedulerPolicy};

#[derive(Parser, Debug)]
#[command(
    name = "svm",
    about = "Boot the simulated machine with a set of executable images and run it to completion."
)]
struct Args {
    /// JSON kernel config; command-line options override its fields.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Scheduling policy.
    #[arg(long, value_enum)]
    policy: Option<SchedulerPolicy>,

    /// Size of physical memory in words.
    #[arg(long, value_name = "WORDS")]
    memory_words: Option<usize>,

    /// Timer ticks a process may run before it is preempted.
    #[arg(long)]
    quantum: Option<u32>,

    /// CPU steps between timer interrupts.
    #[arg(long, value_name = "STEPS")]
    timer_period: Option<u64>,

    /// Stop after this many CPU steps even if processes remain.
    #[arg(long, value_name = "N")]
    max_steps: Option<u64>,

    /// Print the run summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Executable images, loaded in order. Append `@N` to set a priority.
    #[arg(value_name = "IMAGE[@PRIORITY]")]
    images: Vec<ImageSpec>,
}

impl Args {
    fn into_config(self) -> Result<KernelConfig> {
        let mut config = match &self.config {
            Some(path) => KernelConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => KernelConfig::default(),
        };
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(words) = self.memory_words {
            config.memory_words = words;
        }
        if let Some(quantum) = self.quantum {
            config.quantum = quantum;
        }
        if let Some(period) = self.timer_period {
            config.timer_period = period;
        }
        if self.max_steps.is_some() {
            config.max_steps = self.max_steps;
        }
        config.images.extend(self.images);
        if config.images.is_empty() {
            bail!("no executable images given");
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let json = args.json;
    let config = args.into_config()?;
    info!(
        "starting {} image(s) under {} scheduling",
        config.images.len(),
        config.policy
    );

    let summary = boot_and_run(&config).context("running the machine")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{}: {} steps, {} timer ticks, {} context switches, {} terminated, {} invalid opcodes, {} faults",
            if summary.halted { "halted" } else { "stopped" },
            summary.stats.steps,
            summary.stats.timer_ticks,
            summary.stats.context_switches,
            summary.stats.terminated,
            summary.stats.invalid_opcodes,
            summary.stats.faults,
        );
        if !summary.remaining.is_empty() {
            println!("still loaded: {:?}", summary.remaining);
        }
        println!("free words: {}", summary.free_words);
    }
    Ok(())
}
