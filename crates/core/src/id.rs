//! Strongly-typed identifiers used across the workspace.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Capability implemented by every listener identifier type.
///
/// A listener id knows its own type tag and can be parsed from, and rendered
/// to, a canonical textual form (`FromStr` / `Display`).
pub trait ListenerId:
    FromStr<Err = DomainError> + fmt::Display + Clone + Send + Sync + 'static
{
    /// Stable type tag used on the command line and in stream names.
    const TYPE: &'static str;

    fn subscription_id(&self) -> SubscriptionId {
        SubscriptionId::new(Self::TYPE, self.to_string())
    }
}

/// Identifier of a subscription instance: a type tag plus the canonical id text.
///
/// Equality is by value. Only construct one from already-canonical text; use
/// [`IdentifierRegistry::resolve`] for operator input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId {
    kind: String,
    value: String,
}

impl SubscriptionId {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Stream holding this subscription's own lifecycle events.
    pub fn stream_name(&self) -> StreamName {
        StreamName::new(format!(
            "{}-{}-{}",
            StreamName::SUBSCRIPTION_CATEGORY,
            self.kind,
            self.value
        ))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.value)
    }
}

/// Name of an event stream, `<category>-<rest>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Category of the streams that record subscription lifecycles.
    pub const SUBSCRIPTION_CATEGORY: &'static str = "$subscription";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the first `-` (the whole name when there is none).
    pub fn category(&self) -> &str {
        self.0.split_once('-').map(|(c, _)| c).unwrap_or(&self.0)
    }

    /// Streams whose category starts with `$` are internal bookkeeping.
    pub fn is_internal(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Implements the UUID newtype surface (constructors, `Display`, `FromStr`).
#[doc(hidden)]
#[macro_export]
macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self($crate::uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: $crate::uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &$crate::uuid::Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::core::fmt::Display for $t {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$crate::uuid::Uuid> for $t {
            fn from(value: $crate::uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl ::core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                let uuid = <$crate::uuid::Uuid as ::core::str::FromStr>::from_str(s)
                    .map_err(|e| $crate::DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                ::core::result::Result::Ok(Self(uuid))
            }
        }
    };
}

/// Declares a UUID-backed [`ListenerId`] type.
///
/// ```ignore
/// conduit_core::uuid_listener_id!(pub struct InvoiceProjectorId => "invoice-projector");
/// ```
#[macro_export]
macro_rules! uuid_listener_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident => $tag:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        $vis struct $name($crate::uuid::Uuid);

        $crate::impl_uuid_newtype!($name, $tag);

        impl $crate::ListenerId for $name {
            const TYPE: &'static str = $tag;
        }
    };
}

/// Identifier of a stored event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(uuid::Uuid);

impl_uuid_newtype!(EventId, "EventId");

type IdParser = Box<dyn Fn(&str) -> DomainResult<String> + Send + Sync>;

/// Explicit mapping from type tags to identifier parsers, filled at startup.
#[derive(Default)]
pub struct IdentifierRegistry {
    parsers: BTreeMap<&'static str, IdParser>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener id type under its [`ListenerId::TYPE`] tag.
    pub fn register<I: ListenerId>(&mut self) -> &mut Self {
        self.parsers.insert(
            I::TYPE,
            Box::new(|raw: &str| I::from_str(raw).map(|id| id.to_string())),
        );
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.parsers.contains_key(kind)
    }

    /// Registered type tags in sorted order.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.parsers.keys().copied()
    }

    /// Resolve a (type tag, textual id) pair into a canonical [`SubscriptionId`].
    ///
    /// Fails with [`DomainError::InvalidId`] when the tag is unknown or the
    /// registered parser rejects the value.
    pub fn resolve(&self, kind: &str, value: &str) -> DomainResult<SubscriptionId> {
        let parser = self.parsers.get(kind).ok_or_else(|| {
            DomainError::invalid_id(format!(
                "given subscription type \"{kind}\" is not a registered listener id type"
            ))
        })?;

        let canonical = parser(value).map_err(|_| {
            DomainError::invalid_id(format!("given subscription id \"{value}\" is invalid"))
        })?;

        Ok(SubscriptionId::new(kind, canonical))
    }
}

impl fmt::Debug for IdentifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierRegistry")
            .field("kinds", &self.parsers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::uuid_listener_id!(struct ProjectorId => "projector");

    #[derive(Debug, Clone)]
    struct Slug(String);

    impl FromStr for Slug {
        type Err = DomainError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '-') {
                Ok(Self(s.to_string()))
            } else {
                Err(DomainError::invalid_id(s))
            }
        }
    }

    impl fmt::Display for Slug {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl ListenerId for Slug {
        const TYPE: &'static str = "slug";
    }

    fn registry() -> IdentifierRegistry {
        let mut registry = IdentifierRegistry::new();
        registry.register::<ProjectorId>().register::<Slug>();
        registry
    }

    #[test]
    fn resolves_registered_type_to_canonical_form() {
        let id = registry()
            .resolve("projector", "EC2BE294-C07A-4198-A159-4551686F14F9")
            .unwrap();

        assert_eq!(id.kind(), "projector");
        assert_eq!(id.value(), "ec2be294-c07a-4198-a159-4551686f14f9");
        assert_eq!(
            id.to_string(),
            "projector(ec2be294-c07a-4198-a159-4551686f14f9)"
        );
    }

    #[test]
    fn unknown_type_is_invalid_identifier() {
        let err = registry()
            .resolve("foo-bar", "EC2BE294-C07A-4198-A159-4551686F14F9")
            .unwrap_err();

        assert_eq!(
            err,
            DomainError::invalid_id(
                "given subscription type \"foo-bar\" is not a registered listener id type"
            )
        );
    }

    #[test]
    fn unparsable_value_is_invalid_identifier() {
        let err = registry().resolve("projector", "not-an-uuid").unwrap_err();

        assert_eq!(
            err,
            DomainError::invalid_id("given subscription id \"not-an-uuid\" is invalid")
        );
    }

    #[test]
    fn equal_ids_resolve_to_equal_values() {
        let registry = registry();
        let a = registry.resolve("slug", "orders").unwrap();
        let b = ProjectorId::new();

        assert_eq!(a, Slug("orders".into()).subscription_id());
        assert_ne!(a, b.subscription_id());
    }

    #[test]
    fn subscription_streams_are_internal() {
        let id = SubscriptionId::new("slug", "orders");
        let stream = id.stream_name();

        assert_eq!(stream.as_str(), "$subscription-slug-orders");
        assert_eq!(stream.category(), StreamName::SUBSCRIPTION_CATEGORY);
        assert!(stream.is_internal());
        assert!(!StreamName::new("order-1").is_internal());
    }

    #[test]
    fn kinds_are_listed_in_order() {
        let kinds: Vec<_> = registry().kinds().collect();
        assert_eq!(kinds, vec!["projector", "slug"]);
    }
}
