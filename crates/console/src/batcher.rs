use std::sync::Arc;

use tracing::trace;

use conduit_events::{Subscription, UnitOfWork, UnitOfWorkError};

use crate::config::CommitThreshold;

/// Batches per-event changes of a subscription into periodic commits.
///
/// Every processed event stages the subscription in the unit of work; once
/// `threshold` events are staged they are committed together. The remainder
/// is committed by [`finish`](Self::finish), or dropped by
/// [`abort`](Self::abort).
#[derive(Debug)]
pub struct UnitOfWorkBatcher<U: UnitOfWork> {
    uow: U,
    threshold: CommitThreshold,
    batched: u64,
    commits: u64,
}

impl<U: UnitOfWork> UnitOfWorkBatcher<U> {
    pub fn new(uow: U, threshold: CommitThreshold) -> Self {
        Self {
            uow,
            threshold,
            batched: 0,
            commits: 0,
        }
    }

    /// Stage one processed event. Returns `true` when this filled a batch and
    /// the batch was committed.
    pub fn record(&mut self, subscription: &Arc<dyn Subscription>) -> Result<bool, UnitOfWorkError> {
        self.uow.add(Arc::clone(subscription));
        self.batched += 1;

        if self.batched < self.threshold.get() {
            return Ok(false);
        }

        self.flush()?;
        // Stays the dirty entity of the next batch.
        self.uow.add(Arc::clone(subscription));
        Ok(true)
    }

    /// Commit the partial batch, if any, and release the unit of work.
    pub fn finish(&mut self) -> Result<(), UnitOfWorkError> {
        if self.batched > 0 {
            self.flush()?;
        }
        self.uow.clear();
        Ok(())
    }

    /// Discard the uncommitted batch.
    pub fn abort(&mut self) {
        self.uow.clear();
        self.batched = 0;
    }

    /// Number of commits performed so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Events staged since the last commit.
    pub fn pending(&self) -> u64 {
        self.batched
    }

    pub fn into_inner(self) -> U {
        self.uow
    }

    fn flush(&mut self) -> Result<(), UnitOfWorkError> {
        let batched = std::mem::take(&mut self.batched);
        let committed = self.uow.commit()?;
        self.commits += 1;
        trace!(events = batched, stored = committed.len(), "batch committed");
        Ok(())
    }
}
