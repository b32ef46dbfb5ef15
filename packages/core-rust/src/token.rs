//! Conversion between typed values and structured payload tokens.
//!
//! Tokens are `rmpv::Value` trees. Structs encode as named maps and the
//! human-readable representations are used (UUIDs and timestamps as strings),
//! so the same token can be written by either codec.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializationError;

/// Encodes `value` into a payload token.
///
/// # Errors
///
/// Returns [`SerializationError::Token`] if `value` fails to serialize.
pub fn to_token<T: Serialize + ?Sized>(value: &T) -> Result<rmpv::Value, SerializationError> {
    let mut buf = Vec::new();
    let mut ser = rmp_serde::Serializer::new(&mut buf)
        .with_struct_map()
        .with_human_readable();
    value
        .serialize(&mut ser)
        .map_err(|e| SerializationError::Token(e.to_string()))?;
    rmpv::decode::read_value(&mut buf.as_slice())
        .map_err(|e| SerializationError::Token(e.to_string()))
}

/// Decodes a payload token into `T`.
///
/// # Errors
///
/// Returns [`SerializationError::Token`] if the token does not match `T`.
pub fn from_token<T: DeserializeOwned>(token: &rmpv::Value) -> Result<T, SerializationError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, token)
        .map_err(|e| SerializationError::Token(e.to_string()))?;
    let mut de = rmp_serde::Deserializer::new(buf.as_slice()).with_human_readable();
    T::deserialize(&mut de).map_err(|e| SerializationError::Token(e.to_string()))
}
