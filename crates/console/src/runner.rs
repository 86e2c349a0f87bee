//! Event loop of a single subscription.

use std::io::{self, Write};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use conduit_core::{DomainError, IdentifierRegistry, SubscriptionId};
use conduit_events::{
    EventStore, Repository, RepositoryError, Subscription, SubscriptionError, UnitOfWork,
    UnitOfWorkError,
};

use crate::batcher::UnitOfWorkBatcher;
use crate::config::{ConfigError, RunnerConfig};
use crate::progress::ProgressReporter;

/// What went wrong while a subscription was processing events.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Consume(#[from] SubscriptionError),

    #[error(transparent)]
    Commit(#[from] UnitOfWorkError),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    InvalidIdentifier(DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("subscription {subscription} failed: {source}")]
    Processing {
        subscription: SubscriptionId,
        #[source]
        source: ProcessingError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("writing progress failed: {0}")]
    Output(#[from] io::Error),
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub processed: u64,
    pub commits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(RunReport),
    NotFound(SubscriptionId),
}

/// Runs one subscription until its event sequence ends (or the listening
/// limit is reached), committing its progress in batches.
pub struct SingleSubscriptionRunner<'a> {
    identifiers: &'a IdentifierRegistry,
    repository: &'a dyn Repository,
    store: &'a dyn EventStore,
    config: RunnerConfig,
}

impl<'a> SingleSubscriptionRunner<'a> {
    pub fn new(
        identifiers: &'a IdentifierRegistry,
        repository: &'a dyn Repository,
        store: &'a dyn EventStore,
        config: RunnerConfig,
    ) -> Self {
        Self {
            identifiers,
            repository,
            store,
            config,
        }
    }

    /// Resolve `kind`/`value`, load the subscription and run it.
    ///
    /// The progress line (or the "not found" notice) is written to `out`.
    pub fn run<U, W>(&self, kind: &str, value: &str, uow: U, out: &mut W) -> Result<RunOutcome, RunError>
    where
        U: UnitOfWork,
        W: Write,
    {
        let id = self
            .identifiers
            .resolve(kind, value)
            .map_err(RunError::InvalidIdentifier)?;

        let Some(subscription) = self.repository.find(&id)? else {
            writeln!(out, "Subscription {id} not found.")?;
            info!(subscription = %id, "subscription not found");
            return Ok(RunOutcome::NotFound(id));
        };

        self.run_subscription(subscription, uow, out)
            .map(RunOutcome::Finished)
    }

    /// Run an already loaded subscription.
    pub fn run_subscription<U, W>(
        &self,
        subscription: Arc<dyn Subscription>,
        uow: U,
        out: &mut W,
    ) -> Result<RunReport, RunError>
    where
        U: UnitOfWork,
        W: Write,
    {
        let id = subscription.subscription_id().clone();
        let mut batcher = UnitOfWorkBatcher::new(uow, self.config.commit_threshold);
        let mut progress = ProgressReporter::new(id.to_string(), out);

        debug!(
            subscription = %id,
            limit = ?self.config.listening_limit,
            threshold = %self.config.commit_threshold,
            "running subscription"
        );
        progress.draw()?;

        let outcome = self.consume(&subscription, &mut batcher, &mut progress);

        let result = match outcome {
            Ok(()) => batcher.finish().map_err(ProcessingError::from),
            Err(err) => Err(err),
        };

        if let Err(source) = result {
            if self.config.pause_on_error {
                if let Err(err) = subscription.pause() {
                    warn!(subscription = %id, error = %err, "pausing after failure failed");
                }
            }
            batcher.abort();
            if let Err(err) = progress.finish() {
                warn!(subscription = %id, error = %err, "final progress line not written");
            }
            return Err(RunError::Processing {
                subscription: id,
                source,
            });
        }

        progress.finish()?;

        let report = RunReport {
            processed: progress.count(),
            commits: batcher.commits(),
        };
        info!(
            subscription = %id,
            processed = report.processed,
            commits = report.commits,
            "subscription run finished"
        );
        Ok(report)
    }

    fn consume<U, W>(
        &self,
        subscription: &Arc<dyn Subscription>,
        batcher: &mut UnitOfWorkBatcher<U>,
        progress: &mut ProgressReporter<W>,
    ) -> Result<(), ProcessingError>
    where
        U: UnitOfWork,
        W: Write,
    {
        for event in subscription.consume(self.store, self.config.listening_limit) {
            event?;
            progress.advance();
            batcher.record(subscription)?;
            // The terminal may be gone; losing a redraw is not a processing error.
            let _ = progress.draw();
        }
        Ok(())
    }
}
