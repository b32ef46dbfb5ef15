//! Envelope codecs.
//!
//! The dispatch core only depends on [`MessageSerializer`]; the MessagePack
//! and JSON codecs here are the reference implementations.

use crate::envelope::Envelope;
use crate::error::SerializationError;

/// Content type of [`MsgPackSerializer`] output.
pub const MSGPACK_CONTENT_TYPE: &str = "application/vnd.conduit+msgpack";
/// Content type of [`JsonSerializer`] output.
pub const JSON_CONTENT_TYPE: &str = "application/vnd.conduit+json";

/// Encodes envelopes to bytes and back.
///
/// Must be deterministic for identical logical input.
pub trait MessageSerializer: Send + Sync {
    /// MIME type stamped on outbound native messages.
    fn content_type(&self) -> &'static str;

    /// # Errors
    ///
    /// Returns an error if the envelope cannot be encoded.
    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>, SerializationError>;

    /// # Errors
    ///
    /// Returns an error if `bytes` is not a valid encoded envelope.
    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope, SerializationError>;
}

/// Named-map MessagePack via `rmp_serde::to_vec_named`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl MessageSerializer for MsgPackSerializer {
    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }

    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>, SerializationError> {
        Ok(rmp_serde::to_vec_named(envelope)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope, SerializationError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// UTF-8 JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
