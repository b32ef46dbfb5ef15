/// An identifier or address field is present but malformed.
///
/// Raised by the lazy accessors on a consume context. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {field}: {value:?} ({reason})")]
pub struct FormatError {
    /// Envelope field that failed to parse (e.g. `"messageId"`).
    pub field: &'static str,
    /// The raw value as carried on the envelope.
    pub value: String,
    /// Parser diagnostic.
    pub reason: String,
}

impl FormatError {
    #[must_use]
    pub fn new(field: &'static str, value: &str, reason: impl ToString) -> Self {
        Self {
            field,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised while encoding or decoding envelopes and payload tokens.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload token conversion failed: {0}")]
    Token(String),
}
