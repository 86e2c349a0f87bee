use std::io;

use thiserror::Error;

use conduit_events::{EventStoreError, RepositoryError};

use crate::commands::CommandError;
use crate::config::ConfigError;
use crate::runner::RunError;

/// Everything a console command can fail with.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot open the event store: {0}")]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
