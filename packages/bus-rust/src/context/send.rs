use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use conduit_core::{to_token, Address, Envelope, Headers, Message, MessageSerializer, SerializationError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::payload::PayloadCache;

// ---------------------------------------------------------------------------
// OutgoingMessage
// ---------------------------------------------------------------------------

/// A message converted to its payload token plus the type URNs it satisfies.
///
/// This is the untyped form handed to endpoints and transports, so they can
/// be used as trait objects.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    token: rmpv::Value,
    message_types: Vec<String>,
}

impl OutgoingMessage {
    /// # Errors
    ///
    /// Returns an error if `message` cannot be converted to a token.
    pub fn new<T: Message>(message: &T) -> Result<Self, SerializationError> {
        Ok(Self {
            token: to_token(message)?,
            message_types: T::message_types().into_iter().map(String::from).collect(),
        })
    }

    #[must_use]
    pub fn from_parts(token: rmpv::Value, message_types: Vec<String>) -> Self {
        Self {
            token,
            message_types,
        }
    }

    #[must_use]
    pub fn token(&self) -> &rmpv::Value {
        &self.token
    }

    #[must_use]
    pub fn message_types(&self) -> &[String] {
        &self.message_types
    }
}

// ---------------------------------------------------------------------------
// SendContext
// ---------------------------------------------------------------------------

/// Outbound context pushed through a send pipeline.
///
/// Filters set addressing, identifiers and headers before the transport
/// serializes the context into its native form.
pub struct SendContext {
    message: OutgoingMessage,
    pub message_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    pub source_address: Option<Address>,
    pub destination_address: Option<Address>,
    pub response_address: Option<Address>,
    pub fault_address: Option<Address>,
    pub durable: bool,
    pub time_to_live: Option<Duration>,
    pub headers: Headers,
    serializer: Arc<dyn MessageSerializer>,
    cancellation: CancellationToken,
    payloads: PayloadCache,
}

impl SendContext {
    /// A durable context with a fresh message id.
    #[must_use]
    pub fn new(
        message: OutgoingMessage,
        serializer: Arc<dyn MessageSerializer>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            message,
            message_id: Some(Uuid::new_v4()),
            correlation_id: None,
            request_id: None,
            source_address: None,
            destination_address: None,
            response_address: None,
            fault_address: None,
            durable: true,
            time_to_live: None,
            headers: Headers::default(),
            serializer,
            cancellation,
            payloads: PayloadCache::new(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &OutgoingMessage {
        &self.message
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        self.serializer.content_type()
    }

    /// Switches the codec used for the body.
    pub fn set_serializer(&mut self, serializer: Arc<dyn MessageSerializer>) {
        self.serializer = serializer;
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn payloads(&self) -> &PayloadCache {
        &self.payloads
    }

    /// Snapshot of the context in wire form. Expiration is computed from the
    /// time-to-live relative to now.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let mut envelope = Envelope::new(
            self.message.message_types.clone(),
            self.message.token.clone(),
        );
        envelope.message_id = self.message_id.map(|id| id.to_string());
        envelope.correlation_id = self.correlation_id.map(|id| id.to_string());
        envelope.request_id = self.request_id.map(|id| id.to_string());
        envelope.source_address = self.source_address.as_ref().map(ToString::to_string);
        envelope.destination_address = self.destination_address.as_ref().map(ToString::to_string);
        envelope.response_address = self.response_address.as_ref().map(ToString::to_string);
        envelope.fault_address = self.fault_address.as_ref().map(ToString::to_string);
        envelope.expiration_time = self
            .time_to_live
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        envelope.headers = self.headers.clone();
        envelope
    }

    /// Serializes the body. Each call encodes afresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the serializer rejects the envelope.
    pub fn body(&self) -> Result<Bytes, SerializationError> {
        self.serializer
            .serialize(&self.to_envelope())
            .map(Bytes::from)
    }
}

impl fmt::Debug for SendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendContext")
            .field("message_types", &self.message.message_types)
            .field("message_id", &self.message_id)
            .field("correlation_id", &self.correlation_id)
            .field("request_id", &self.request_id)
            .field("destination_address", &self.destination_address)
            .field("durable", &self.durable)
            .field("content_type", &self.content_type())
            .finish_non_exhaustive()
    }
}
