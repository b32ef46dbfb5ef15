//! Transport-neutral message envelope.
//!
//! Field names follow the logical wire contract: every transport binding
//! must be able to carry these fields, whatever its byte layout. Identifier
//! and address fields stay strings here; they are parsed lazily by the
//! consume context so a malformed value only fails the accessor that reads it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::headers::Headers;

/// Envelope carrying a structured payload token plus routing and identity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub destination_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fault_address: Option<String>,
    /// Declared message type URNs, most-derived first.
    #[serde(default)]
    pub message_type: Vec<String>,
    /// Payload token.
    #[serde(default = "nil_token")]
    pub message: rmpv::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Headers::is_empty", default)]
    pub headers: Headers,
}

fn nil_token() -> rmpv::Value {
    rmpv::Value::Nil
}

impl Envelope {
    /// Envelope carrying `message` declared as `message_type`, all metadata absent.
    #[must_use]
    pub fn new(message_type: Vec<String>, message: rmpv::Value) -> Self {
        Self {
            message_id: None,
            request_id: None,
            correlation_id: None,
            source_address: None,
            destination_address: None,
            response_address: None,
            fault_address: None,
            message_type,
            message,
            expiration_time: None,
            headers: Headers::default(),
        }
    }

    /// The payload token, with a null payload normalized to an empty map.
    #[must_use]
    pub fn message_token(&self) -> rmpv::Value {
        match &self.message {
            rmpv::Value::Nil => rmpv::Value::Map(Vec::new()),
            other => other.clone(),
        }
    }
}
