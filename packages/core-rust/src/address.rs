//! Parsing of the string-encoded identity fields carried by an envelope.
//!
//! Blank values mean "absent". Anything else must parse, otherwise the caller
//! gets a [`FormatError`] instead of a silent `None`.

use uuid::Uuid;

use crate::error::FormatError;

/// Endpoint address (e.g. `loopback://localhost/orders`).
pub type Address = http::Uri;

/// Parses an optional identifier. Accepts every textual UUID form
/// (hyphenated, simple, braced, URN).
///
/// # Errors
///
/// Returns [`FormatError`] if the value is non-blank but not a UUID.
pub fn parse_id(field: &'static str, value: Option<&str>) -> Result<Option<Uuid>, FormatError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|e| FormatError::new(field, raw, e)),
    }
}

/// Parses an optional absolute address.
///
/// # Errors
///
/// Returns [`FormatError`] if the value is non-blank but not an absolute URI.
pub fn parse_address(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<Address>, FormatError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => {
            let uri: Address = raw.parse().map_err(|e| FormatError::new(field, raw, e))?;
            if uri.scheme().is_none() || uri.authority().is_none() {
                return Err(FormatError::new(field, raw, "address must be an absolute URI"));
            }
            Ok(Some(uri))
        }
    }
}

/// Formats an identifier the way transports carry it natively (32 hex digits).
#[must_use]
pub fn format_native_id(id: &Uuid) -> String {
    id.simple().to_string()
}
