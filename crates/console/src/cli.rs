//! Command line surface of the `conduit` binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{CommitThreshold, ConfigError, RunnerConfig, SupervisorConfig};
use conduit_observability::Verbosity;

pub const DEFAULT_STORE: &str = "conduit-events.jsonl";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Runs event subscriptions", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Event log file
    #[arg(long, global = true, env = "CONDUIT_STORE", default_value = DEFAULT_STORE)]
    pub store: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }

    /// Flags a worker inherits from this process.
    fn inherited_flags(&self) -> Vec<String> {
        let mut flags = vec!["--store".to_string(), self.store.display().to_string()];
        if self.quiet {
            flags.push("-q".to_string());
        } else if self.verbose > 0 {
            flags.push(format!("-{}", "v".repeat(usize::from(self.verbose))));
        }
        flags
    }

    /// Supervisor configuration for `run-subscriptions`.
    pub fn supervisor_config(&self, args: &RunAllArgs) -> Result<SupervisorConfig, ConfigError> {
        let config = match &args.executable {
            Some(executable) => SupervisorConfig::for_executable(executable),
            None => SupervisorConfig::current_exe()?,
        };

        let mut pass_through = self.inherited_flags();
        pass_through.extend(args.processing.worker_flags()?);

        Ok(config
            .with_concurrency_limit(args.concurrency_limit)?
            .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
            .with_pass_through(pass_through))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one subscription in this process
    RunSubscription(RunArgs),

    /// Run every eligible subscription, each in its own worker process
    RunSubscriptions(RunAllArgs),

    /// Pause a subscription
    PauseSubscription(TargetArgs),

    /// Unpause a paused subscription
    UnpauseSubscription(TargetArgs),

    /// Restart a subscription from the beginning of the log
    RestartSubscription(TargetArgs),

    /// Restart every eligible subscription
    RestartSubscriptions {
        /// Subscription types to restart (all when omitted)
        types: Vec<String>,
    },

    /// Record the start of a new subscription
    StartSubscription(TargetArgs),
}

/// A subscription named by its type and id.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Subscription type
    #[arg(value_name = "TYPE")]
    pub kind: String,

    /// Subscription id
    #[arg(value_name = "ID")]
    pub id: String,
}

/// How a subscription processes events.
#[derive(Args, Debug, Clone, Default)]
pub struct ProcessingArgs {
    /// Stop after this many events
    #[arg(long, value_name = "N")]
    pub listening_limit: Option<u64>,

    /// Pause the subscription when processing fails
    #[arg(long)]
    pub pause_on_error: bool,

    /// Commit after this many events
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub commit_threshold: u64,
}

impl ProcessingArgs {
    pub fn runner_config(&self) -> Result<RunnerConfig, ConfigError> {
        Ok(RunnerConfig::default()
            .with_listening_limit(self.listening_limit)
            .with_pause_on_error(self.pause_on_error)
            .with_commit_threshold(CommitThreshold::new(self.commit_threshold)?))
    }

    /// The same settings as `run-subscription` flags. Validates the threshold
    /// so a bad value fails once here instead of in every worker.
    fn worker_flags(&self) -> Result<Vec<String>, ConfigError> {
        let threshold = CommitThreshold::new(self.commit_threshold)?;

        let mut flags = Vec::new();
        if let Some(limit) = self.listening_limit {
            flags.push(format!("--listening-limit={limit}"));
        }
        flags.push(format!("--commit-threshold={threshold}"));
        if self.pause_on_error {
            flags.push("--pause-on-error".to_string());
        }
        Ok(flags)
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunAllArgs {
    /// Subscription types to run (all when omitted)
    pub types: Vec<String>,

    /// Maximum number of workers running at the same time
    #[arg(
        long,
        value_name = "N",
        env = "CONDUIT_CONCURRENCY_LIMIT",
        default_value_t = SupervisorConfig::DEFAULT_CONCURRENCY_LIMIT
    )]
    pub concurrency_limit: usize,

    /// Program started for every worker (defaults to this executable)
    #[arg(long, value_name = "PATH")]
    pub executable: Option<PathBuf>,

    /// Also run completed subscriptions
    #[arg(long)]
    pub include_completed: bool,

    /// Milliseconds between two checks of the workers
    #[arg(long, value_name = "MS", default_value_t = 100)]
    pub poll_interval_ms: u64,

    #[command(flatten)]
    pub processing: ProcessingArgs,
}
