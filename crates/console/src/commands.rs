//! Single state-transition commands: start, pause, unpause and restart.

use std::io::{self, Write};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use conduit_core::{DomainError, IdentifierRegistry, SubscriptionId};
use conduit_events::{
    Repository, RepositoryError, RestartOutcome, Subscription, SubscriptionError,
    SubscriptionFilter,
};
use conduit_infra::EventSourcedRepository;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    InvalidIdentifier(DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("pausing {subscription} failed: {source}")]
    Pause {
        subscription: SubscriptionId,
        #[source]
        source: SubscriptionError,
    },

    #[error("unpausing {subscription} failed: {source}")]
    Unpause {
        subscription: SubscriptionId,
        #[source]
        source: SubscriptionError,
    },

    #[error("restarting {subscription} failed: {source}")]
    Restart {
        subscription: SubscriptionId,
        #[source]
        source: SubscriptionError,
    },

    #[error("writing output failed: {0}")]
    Output(#[from] io::Error),
}

/// Handled result of a command. Errors are returned as [`CommandError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    NotFound,
    /// Restart asked for a listener that cannot be reset.
    NotSupported,
    AlreadyExists,
}

/// Per-subscription tally of `restart-subscriptions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartSummary {
    pub restarted: usize,
    pub not_supported: usize,
    pub failed: usize,
}

pub struct SubscriptionCommands<'a> {
    identifiers: &'a IdentifierRegistry,
    repository: &'a dyn Repository,
}

impl<'a> SubscriptionCommands<'a> {
    pub fn new(identifiers: &'a IdentifierRegistry, repository: &'a dyn Repository) -> Self {
        Self {
            identifiers,
            repository,
        }
    }

    pub fn pause<O: Write, E: Write>(
        &self,
        kind: &str,
        value: &str,
        out: &mut O,
        err: &mut E,
    ) -> Result<CommandOutcome, CommandError> {
        let Some(subscription) = self.load(kind, value, out)? else {
            return Ok(CommandOutcome::NotFound);
        };
        let id = subscription.subscription_id();

        match subscription.pause() {
            Ok(()) => {
                writeln!(out, "Subscription {id} pausing succeeded.")?;
                info!(subscription = %id, "subscription paused");
                Ok(CommandOutcome::Succeeded)
            }
            Err(source) => {
                writeln!(err, "Subscription {id} pausing failed.")?;
                Err(CommandError::Pause {
                    subscription: id.clone(),
                    source,
                })
            }
        }
    }

    pub fn unpause<O: Write, E: Write>(
        &self,
        kind: &str,
        value: &str,
        out: &mut O,
        err: &mut E,
    ) -> Result<CommandOutcome, CommandError> {
        let Some(subscription) = self.load(kind, value, out)? else {
            return Ok(CommandOutcome::NotFound);
        };
        let id = subscription.subscription_id();

        match subscription.unpause() {
            Ok(()) => {
                writeln!(out, "Subscription {id} unpausing succeeded.")?;
                info!(subscription = %id, "subscription unpaused");
                Ok(CommandOutcome::Succeeded)
            }
            Err(source) => {
                writeln!(err, "Subscription {id} unpausing failed.")?;
                Err(CommandError::Unpause {
                    subscription: id.clone(),
                    source,
                })
            }
        }
    }

    /// Restart one subscription. A listener that cannot be reset is reported
    /// as "not supported" and is not an error.
    pub fn restart<O: Write, E: Write>(
        &self,
        kind: &str,
        value: &str,
        out: &mut O,
        err: &mut E,
    ) -> Result<CommandOutcome, CommandError> {
        let Some(subscription) = self.load(kind, value, out)? else {
            return Ok(CommandOutcome::NotFound);
        };
        let id = subscription.subscription_id();

        match subscription.restart() {
            RestartOutcome::Restarted => {
                writeln!(out, "Subscription {id} restart succeeded.")?;
                info!(subscription = %id, "subscription restarted");
                Ok(CommandOutcome::Succeeded)
            }
            RestartOutcome::NotPossible => {
                writeln!(out, "Subscription {id} restart not supported.")?;
                Ok(CommandOutcome::NotSupported)
            }
            RestartOutcome::Failed(source) => {
                writeln!(err, "Subscription {id} restart failed.")?;
                Err(CommandError::Restart {
                    subscription: id.clone(),
                    source,
                })
            }
        }
    }

    /// Restart every eligible subscription of the given types (all types when
    /// empty). A failure is reported and the next subscription is tried.
    pub fn restart_all<O: Write>(
        &self,
        kinds: &[String],
        out: &mut O,
    ) -> Result<RestartSummary, CommandError> {
        let filter = SubscriptionFilter::new().with_kinds(kinds.iter().cloned());
        let mut summary = RestartSummary::default();

        for subscription in self.repository.all(&filter)? {
            let id = subscription.subscription_id();
            match subscription.restart() {
                RestartOutcome::Restarted => {
                    summary.restarted += 1;
                    writeln!(out, "Subscription {id} restart succeeded.")?;
                }
                RestartOutcome::NotPossible => {
                    summary.not_supported += 1;
                    writeln!(out, "Subscription {id} restart not supported.")?;
                }
                RestartOutcome::Failed(err) => {
                    summary.failed += 1;
                    warn!(subscription = %id, error = %err, "restart failed");
                    writeln!(out, "Subscription {id} restart failed with \"{err}\".")?;
                }
            }
        }

        info!(
            restarted = summary.restarted,
            not_supported = summary.not_supported,
            failed = summary.failed,
            "restarted subscriptions"
        );
        Ok(summary)
    }

    fn load<O: Write>(
        &self,
        kind: &str,
        value: &str,
        out: &mut O,
    ) -> Result<Option<Arc<dyn Subscription>>, CommandError> {
        let id = self
            .identifiers
            .resolve(kind, value)
            .map_err(CommandError::InvalidIdentifier)?;

        let subscription = self.repository.find(&id)?;
        if subscription.is_none() {
            writeln!(out, "Subscription {id} not found.")?;
        }
        Ok(subscription)
    }
}

/// Record the start of a new subscription.
pub fn start_subscription<O: Write>(
    repository: &EventSourcedRepository,
    kind: &str,
    value: &str,
    out: &mut O,
) -> Result<CommandOutcome, CommandError> {
    let id = repository
        .listeners()
        .identifiers()
        .resolve(kind, value)
        .map_err(CommandError::InvalidIdentifier)?;

    match repository.create(&id) {
        Ok(_) => {
            writeln!(out, "Subscription {id} started.")?;
            info!(subscription = %id, "subscription started");
            Ok(CommandOutcome::Succeeded)
        }
        Err(RepositoryError::AlreadyExists(_)) => {
            writeln!(out, "Subscription {id} already exists.")?;
            Ok(CommandOutcome::AlreadyExists)
        }
        Err(err) => Err(err.into()),
    }
}
