//! Fault events.
//!
//! A fault wraps the message whose consumption failed together with the
//! producing host and the error chain. It is a message in its own right and
//! is routed like any reply.

use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::host::HostInfo;
use crate::urn::{Message, MessageUrn};

/// Namespace used for contracts defined by the bus itself.
pub const BUS_NAMESPACE: &str = "Conduit";

/// One link of an error chain, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub inner: Option<Box<ExceptionInfo>>,
}

impl ExceptionInfo {
    /// Captures `error` and every `source()` below it.
    #[must_use]
    pub fn from_error(error: &(dyn StdError + 'static)) -> Self {
        Self {
            message: error.to_string(),
            inner: error.source().map(|s| Box::new(Self::from_error(s))),
        }
    }

    /// Number of links in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.inner.as_ref().map_or(0, |i| i.depth())
    }
}

/// Published or replied when a consumer fails to handle `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fault<T> {
    pub fault_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub faulted_message_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub host: HostInfo,
    pub exceptions: Vec<ExceptionInfo>,
    pub message: T,
}

impl<T> Fault<T> {
    #[must_use]
    pub fn new(
        message: T,
        faulted_message_id: Option<Uuid>,
        error: &(dyn StdError + 'static),
    ) -> Self {
        Self {
            fault_id: Uuid::new_v4(),
            faulted_message_id,
            timestamp: Utc::now(),
            host: HostInfo::current().clone(),
            exceptions: vec![ExceptionInfo::from_error(error)],
            message,
        }
    }
}

impl<T: Message> Message for Fault<T> {
    fn message_urn() -> MessageUrn {
        MessageUrn::generic(BUS_NAMESPACE, "Fault", &T::message_urn())
    }

    /// A fault of every contract `T` satisfies, then the untyped fault contract.
    fn message_types() -> Vec<MessageUrn> {
        T::message_types()
            .iter()
            .map(|urn| MessageUrn::generic(BUS_NAMESPACE, "Fault", urn))
            .chain(std::iter::once(MessageUrn::new(BUS_NAMESPACE, "Fault")))
            .collect()
    }
}
