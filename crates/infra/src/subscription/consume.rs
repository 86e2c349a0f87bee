use std::collections::VecDeque;

use conduit_events::{EventStore, StoredEvent, SubscriptionError};

use super::{SourcedSubscription, Step};

/// Events fetched from the global log per round trip.
const PAGE_SIZE: usize = 100;

/// Lazy walk over the global log on behalf of one subscription.
///
/// Keeps its own read cursor so skipped internal events are not fetched again.
pub(super) struct Consume<'a> {
    subscription: &'a SourcedSubscription,
    store: &'a dyn EventStore,
    cursor: u64,
    page: VecDeque<StoredEvent>,
    remaining: Option<u64>,
    done: bool,
}

impl<'a> Consume<'a> {
    pub(super) fn new(
        subscription: &'a SourcedSubscription,
        store: &'a dyn EventStore,
        limit: Option<u64>,
    ) -> Self {
        let start = subscription.running_position();
        Self {
            subscription,
            store,
            cursor: start.unwrap_or(0),
            page: VecDeque::new(),
            remaining: limit,
            done: start.is_none(),
        }
    }

    fn next_from_log(&mut self) -> Option<Result<StoredEvent, SubscriptionError>> {
        if let Some(event) = self.page.pop_front() {
            return Some(Ok(event));
        }

        match self.store.read_all(self.cursor, PAGE_SIZE) {
            Ok(page) if page.is_empty() => None,
            Ok(page) => {
                self.page = page.into();
                self.page.pop_front().map(Ok)
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

impl Iterator for Consume<'_> {
    type Item = Result<StoredEvent, SubscriptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            self.done = true;
            return None;
        }

        loop {
            let event = match self.next_from_log() {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            self.cursor = event.position();
            if event.stream().is_internal() {
                continue;
            }

            return match self.subscription.handle(&event) {
                Ok(Step::Continue) => {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    Some(Ok(event))
                }
                Ok(Step::Last) => {
                    self.done = true;
                    Some(Ok(event))
                }
                Ok(Step::Stop) => {
                    self.done = true;
                    None
                }
                Err(err) => {
                    self.done = true;
                    Some(Err(err))
                }
            };
        }
    }
}
