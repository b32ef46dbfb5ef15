//! Ordered header bag carried by envelopes and outbound contexts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SerializationError;
use crate::token::{from_token, to_token};

/// Ordered key/value pairs. Values stay as payload tokens until a caller
/// asks for a concrete type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, rmpv::Value)>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an existing entry in place or appending.
    pub fn set(&mut self, key: impl Into<String>, value: rmpv::Value) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Serializes `value` into a token and stores it under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as a token.
    pub fn set_typed<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), SerializationError> {
        self.set(key, to_token(value)?);
        Ok(())
    }

    /// Raw token for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&rmpv::Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Typed view of `key`. `Ok(None)` when the header is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored token does not decode as `T`.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SerializationError> {
        self.get(key).map(from_token).transpose()
    }

    pub fn remove(&mut self, key: &str) -> Option<rmpv::Value> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &rmpv::Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
