//! Conduit core: message contracts, URNs, envelopes, fault events, and serializers.

pub mod address;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod headers;
pub mod host;
pub mod serializer;
pub mod token;
pub mod urn;

pub use address::{format_native_id, parse_address, parse_id, Address};
pub use envelope::Envelope;
pub use error::{FormatError, SerializationError};
pub use fault::{ExceptionInfo, Fault, BUS_NAMESPACE};
pub use headers::Headers;
pub use host::HostInfo;
pub use serializer::{
    JsonSerializer, MessageSerializer, MsgPackSerializer, JSON_CONTENT_TYPE, MSGPACK_CONTENT_TYPE,
};
pub use token::{from_token, to_token};
pub use urn::{Message, MessageUrn, PayloadKind};
