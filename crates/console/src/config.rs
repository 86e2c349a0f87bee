//! Typed runner/supervisor configuration, validated at construction.

use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("commit threshold must be a positive number of events, got {0}")]
    CommitThreshold(u64),

    #[error("concurrency limit must be at least 1")]
    ConcurrencyLimit,

    #[error("cannot determine the worker executable: {0}")]
    Executable(String),
}

/// Number of processed events after which pending changes are committed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommitThreshold(NonZeroU64);

impl CommitThreshold {
    pub const EVERY_EVENT: CommitThreshold = CommitThreshold(NonZeroU64::MIN);

    pub fn new(events: u64) -> Result<Self, ConfigError> {
        NonZeroU64::new(events)
            .map(Self)
            .ok_or(ConfigError::CommitThreshold(events))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl Default for CommitThreshold {
    fn default() -> Self {
        Self::EVERY_EVENT
    }
}

impl std::fmt::Display for CommitThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Single-subscription runner configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum number of events consumed in one run (`None` = until the log ends).
    pub listening_limit: Option<u64>,
    /// Pause the subscription before propagating a processing error.
    pub pause_on_error: bool,
    pub commit_threshold: CommitThreshold,
}

impl RunnerConfig {
    pub fn with_listening_limit(mut self, limit: Option<u64>) -> Self {
        self.listening_limit = limit;
        self
    }

    pub fn with_pause_on_error(mut self, pause: bool) -> Self {
        self.pause_on_error = pause;
        self
    }

    pub fn with_commit_threshold(mut self, threshold: CommitThreshold) -> Self {
        self.commit_threshold = threshold;
        self
    }
}

/// Worker process supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Maximum number of simultaneously live workers.
    pub concurrency_limit: usize,
    /// Sleep between two poll cycles.
    pub poll_interval: Duration,
    /// Program started for every worker.
    pub executable: PathBuf,
    /// Arguments appended to every worker command line.
    pub pass_through: Vec<String>,
}

impl SupervisorConfig {
    pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Defaults with the currently running executable as the worker program.
    pub fn current_exe() -> Result<Self, ConfigError> {
        let executable =
            std::env::current_exe().map_err(|e| ConfigError::Executable(e.to_string()))?;
        Ok(Self::for_executable(executable))
    }

    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            concurrency_limit: Self::DEFAULT_CONCURRENCY_LIMIT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            executable: executable.into(),
            pass_through: Vec::new(),
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::ConcurrencyLimit);
        }
        self.concurrency_limit = limit;
        Ok(self)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pass_through<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pass_through = args.into_iter().map(Into::into).collect();
        self
    }
}
