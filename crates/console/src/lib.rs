//! `conduit-console`: runs event subscriptions from the command line.
//!
//! A single subscription runs in-process ([`SingleSubscriptionRunner`]);
//! many subscriptions fan out into one worker process each
//! ([`WorkerProcessSupervisor`]) whose output is merged into one view
//! ([`OutputMultiplexer`]).

pub mod app;
pub mod batcher;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod output;
pub mod progress;
pub mod runner;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use app::{Console, ConsoleBuilder};
pub use batcher::UnitOfWorkBatcher;
pub use cli::Cli;
pub use commands::{CommandError, CommandOutcome, RestartSummary, SubscriptionCommands};
pub use config::{CommitThreshold, ConfigError, RunnerConfig, SupervisorConfig};
pub use error::ConsoleError;
pub use logger::{LoggerId, LoggerListener};
pub use output::{OutputMultiplexer, RenderRegion};
pub use progress::ProgressReporter;
pub use runner::{ProcessingError, RunError, RunOutcome, RunReport, SingleSubscriptionRunner};
pub use supervisor::{
    OsLauncher, SupervisorReport, WorkerCommand, WorkerExit, WorkerLauncher, WorkerOutput,
    WorkerProcess, WorkerProcessSupervisor,
};
