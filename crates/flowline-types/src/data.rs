//! The untyped key/value payload threaded between handlers.
//!
//! [`Data`] is a string-keyed bag of JSON values. Typed accessors apply
//! best-effort coercion (numbers, bools and strings cross-convert);
//! [`Data::get_struct`] round-trips through JSON into any deserializable type.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from typed access into a [`Data`] bag.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// The key is not present.
    #[error("key '{0}' not found")]
    Missing(String),

    /// The value could not be decoded into the requested type.
    #[error("decode failed for key '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A string-keyed, dynamically-typed value container.
///
/// Uses a `BTreeMap` so the serialized form is deterministic -- a bag that is
/// persisted and reloaded serializes back to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Data(BTreeMap<String, Value>);

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw access to a stored value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a string, coercing bools and numbers to their display form.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Get an integer, coercing floats (truncated), bools and numeric strings.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get a float, coercing integers, bools and numeric strings.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get a bool, coercing non-zero numbers and the usual string spellings.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Decode the value under `key` into `T` by round-tripping through JSON.
    pub fn get_struct<T: DeserializeOwned>(&self, key: &str) -> Result<T, DataError> {
        let value = self
            .get(key)
            .ok_or_else(|| DataError::Missing(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|source| DataError::Decode {
            key: key.to_string(),
            source,
        })
    }

    /// Store any serializable value under `key`.
    pub fn set_struct<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
