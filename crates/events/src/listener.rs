use thiserror::Error;

use crate::StoredEvent;

/// Error raised by listener business logic.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ListenerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// The business logic behind a subscription (saga, projector, process manager).
///
/// Listeners are driven by a subscription; they never read the store themselves.
pub trait Listener: Send {
    /// React to one event from the global log.
    fn on(&mut self, event: &StoredEvent) -> Result<(), ListenerError>;

    /// Whether [`Listener::reset`] is supported (restart is impossible otherwise).
    fn resettable(&self) -> bool {
        false
    }

    /// Drop all derived state so the listener can replay from the beginning.
    fn reset(&mut self) -> Result<(), ListenerError> {
        Ok(())
    }

    /// A completed listener stops consuming for good.
    fn is_completed(&self) -> bool {
        false
    }
}

impl<L> Listener for Box<L>
where
    L: Listener + ?Sized,
{
    fn on(&mut self, event: &StoredEvent) -> Result<(), ListenerError> {
        (**self).on(event)
    }

    fn resettable(&self) -> bool {
        (**self).resettable()
    }

    fn reset(&mut self) -> Result<(), ListenerError> {
        (**self).reset()
    }

    fn is_completed(&self) -> bool {
        (**self).is_completed()
    }
}
