use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use conduit_core::{DomainError, DomainResult, IdentifierRegistry, ListenerId, SubscriptionId};
use conduit_events::Listener;

type Factory = Box<dyn Fn(&SubscriptionId) -> DomainResult<Box<dyn Listener>> + Send + Sync>;

/// Listener types known to the process, keyed by their id type tag.
///
/// Registering a type fills both the identifier registry (for parsing operator
/// input) and the factory used to build its listener.
#[derive(Default)]
pub struct ListenerFactories {
    identifiers: IdentifierRegistry,
    factories: HashMap<&'static str, Factory>,
}

impl ListenerFactories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<I, L, F>(&mut self, factory: F) -> &mut Self
    where
        I: ListenerId,
        L: Listener + 'static,
        F: Fn(I) -> L + Send + Sync + 'static,
    {
        self.identifiers.register::<I>();
        self.factories.insert(
            I::TYPE,
            Box::new(move |id: &SubscriptionId| {
                let typed = I::from_str(id.value())?;
                Ok(Box::new(factory(typed)) as Box<dyn Listener>)
            }),
        );
        self
    }

    pub fn identifiers(&self) -> &IdentifierRegistry {
        &self.identifiers
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Build the listener for `id`.
    pub fn create(&self, id: &SubscriptionId) -> DomainResult<Box<dyn Listener>> {
        let factory = self.factories.get(id.kind()).ok_or_else(|| {
            DomainError::invalid_id(format!("no listener registered for type \"{}\"", id.kind()))
        })?;
        factory(id)
    }
}

impl fmt::Debug for ListenerFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerFactories")
            .field("identifiers", &self.identifiers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use conduit_events::{ListenerError, StoredEvent};

    use super::*;

    conduit_core::uuid_listener_id!(struct AuditId => "audit");

    struct Audit {
        _id: AuditId,
    }

    impl Listener for Audit {
        fn on(&mut self, _event: &StoredEvent) -> Result<(), ListenerError> {
            Ok(())
        }
    }

    #[test]
    fn registration_fills_identifier_registry_and_factory() {
        let mut factories = ListenerFactories::new();
        factories.register(|id: AuditId| Audit { _id: id });

        let id = AuditId::new();
        let resolved = factories
            .identifiers()
            .resolve("audit", &id.to_string())
            .unwrap();

        assert!(factories.contains("audit"));
        assert!(factories.create(&resolved).is_ok());
    }

    #[test]
    fn unknown_type_cannot_be_created() {
        let factories = ListenerFactories::new();
        let err = factories
            .create(&SubscriptionId::new("audit", "x"))
            .err()
            .unwrap();

        assert!(matches!(err, DomainError::InvalidId(_)));
    }
}
