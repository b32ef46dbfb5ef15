//! Message type identity.
//!
//! Every message contract is named by a URN of the form
//! `urn:message:{namespace}:{name}`. An envelope carries the URNs of every
//! contract its payload satisfies, most-derived first, and consumers match
//! against that manifest rather than against the payload format.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Prefix shared by every message URN.
pub const URN_PREFIX: &str = "urn:message:";

/// URN identifying a message contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageUrn(String);

impl MessageUrn {
    /// Builds `urn:message:{namespace}:{name}`.
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{URN_PREFIX}{namespace}:{name}"))
    }

    /// Builds the URN of a generic contract closed over `argument`,
    /// e.g. `urn:message:Conduit:Fault[[Orders:OrderPlaced]]`.
    #[must_use]
    pub fn generic(namespace: &str, name: &str, argument: &MessageUrn) -> Self {
        Self(format!(
            "{URN_PREFIX}{namespace}:{name}[[{}]]",
            argument.type_name()
        ))
    }

    /// The full URN string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `{namespace}:{name}` part without the URN prefix.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.0.strip_prefix(URN_PREFIX).unwrap_or(&self.0)
    }

    /// ASCII case-insensitive comparison against a declared type identifier.
    #[must_use]
    pub fn matches(&self, declared: &str) -> bool {
        self.0.eq_ignore_ascii_case(declared)
    }

    /// Returns `true` if any identifier in `declared` names this contract.
    #[must_use]
    pub fn is_declared_in<S: AsRef<str>>(&self, declared: &[S]) -> bool {
        declared.iter().any(|d| self.matches(d.as_ref()))
    }
}

impl fmt::Display for MessageUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<MessageUrn> for String {
    fn from(urn: MessageUrn) -> Self {
        urn.0
    }
}

/// How a consume context resolves a payload into a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Deserialized from the payload token when the URN is declared.
    Typed,
    /// The payload token itself, handed out without deserialization.
    RawToken,
}

/// A data-only message contract.
///
/// Implementations name their contract and every additional contract they
/// satisfy. `message_types` must list the most-derived contract first and is
/// what a send stamps onto the envelope.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Resolution strategy used by consume contexts.
    const KIND: PayloadKind = PayloadKind::Typed;

    /// URN of this contract.
    fn message_urn() -> MessageUrn;

    /// Every contract this message satisfies, most-derived first.
    fn message_types() -> Vec<MessageUrn> {
        vec![Self::message_urn()]
    }
}

/// The structured payload token passes through resolution untouched.
impl Message for rmpv::Value {
    const KIND: PayloadKind = PayloadKind::RawToken;

    fn message_urn() -> MessageUrn {
        MessageUrn::new("Conduit", "RawMessage")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn formats_namespace_and_name() {
        let urn = MessageUrn::new("Orders", "OrderPlaced");
        assert_eq!(urn.as_str(), "urn:message:Orders:OrderPlaced");
        assert_eq!(urn.type_name(), "Orders:OrderPlaced");
    }

    #[test]
    fn generic_urn_wraps_argument_type_name() {
        let inner = MessageUrn::new("Orders", "OrderPlaced");
        let urn = MessageUrn::generic("Conduit", "Fault", &inner);
        assert_eq!(urn.as_str(), "urn:message:Conduit:Fault[[Orders:OrderPlaced]]");
    }

    #[test]
    fn matching_ignores_ascii_case() {
        let urn = MessageUrn::new("Orders", "OrderPlaced");
        assert!(urn.matches("URN:MESSAGE:orders:orderplaced"));
        assert!(!urn.matches("urn:message:Orders:OrderShipped"));
    }

    #[test]
    fn raw_token_kind() {
        assert_eq!(<rmpv::Value as Message>::KIND, PayloadKind::RawToken);
    }

    fn declared_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-zA-Z]{1,8}:[a-zA-Z]{1,8}", 0..6)
            .prop_map(|names| names.into_iter().map(|n| format!("{URN_PREFIX}{n}")).collect())
    }

    proptest! {
        #[test]
        fn declaration_is_order_and_case_insensitive(
            declared in declared_list(),
            include in any::<bool>(),
            seed in any::<u64>(),
        ) {
            let urn = MessageUrn::new("Target", "Message");
            let mut list = declared;
            if include {
                list.push(urn.as_str().to_ascii_uppercase());
            }
            let expected = include || list.iter().any(|d| urn.matches(d));
            prop_assert_eq!(urn.is_declared_in(&list), expected);

            #[allow(clippy::cast_possible_truncation)]
            let len = list.len().max(1);
            list.rotate_left((seed as usize) % len);
            list.reverse();
            prop_assert_eq!(urn.is_declared_in(&list), expected);
        }
    }
}
