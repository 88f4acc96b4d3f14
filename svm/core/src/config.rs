use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::DEFAULT_MEMORY_WORDS;
use crate::scheduler::SchedulerPolicy;

/// Timer ticks a round-robin process may run before it is preempted.
pub const DEFAULT_QUANTUM: u32 = 100;
/// CPU steps between two timer interrupts.
pub const DEFAULT_TIMER_PERIOD: u64 = 1;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid image spec '{0}': expected PATH or PATH@PRIORITY (0-255)")]
    ImageSpec(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// One executable to load at boot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub path: PathBuf,
    /// Only consulted by the priority policy; higher runs first.
    #[serde(default)]
    pub priority: u8,
}

impl ImageSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

impl FromStr for ImageSpec {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::ImageSpec(raw.to_string()));
        }
        match raw.rsplit_once('@') {
            Some((path, priority)) if !path.is_empty() => {
                let priority = priority
                    .parse()
                    .map_err(|_| ConfigError::ImageSpec(raw.to_string()))?;
                Ok(ImageSpec::new(path).with_priority(priority))
            }
            Some(_) => Err(ConfigError::ImageSpec(raw.to_string())),
            None => Ok(ImageSpec::new(raw)),
        }
    }
}

/// Everything a kernel needs at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    pub policy: SchedulerPolicy,
    /// Loaded in order; each becomes one initial process.
    pub images: Vec<ImageSpec>,
    pub memory_words: usize,
    pub quantum: u32,
    pub timer_period: u64,
    /// Stop the run loop after this many CPU steps.
    pub max_steps: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy: SchedulerPolicy::default(),
            images: Vec::new(),
            memory_words: DEFAULT_MEMORY_WORDS,
            quantum: DEFAULT_QUANTUM,
            timer_period: DEFAULT_TIMER_PERIOD,
            max_steps: None,
        }
    }
}

impl KernelConfig {
    pub fn new(policy: SchedulerPolicy, images: Vec<ImageSpec>) -> Self {
        Self {
            policy,
            images,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timer_period == 0 {
            return Err(ConfigError::Zero("timer_period"));
        }
        Ok(())
    }
}
