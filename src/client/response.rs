//! Decoded upstream response.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::redact_secrets;
use crate::{FredError, Result};

/// A decoded JSON response, as returned to callers and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FredResponse {
    pub payload: Value,
    /// Request URL with credentials removed.
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// True when served from the cache instead of the network.
    #[serde(default)]
    pub from_cache: bool,
}

impl FredResponse {
    /// The same response, flagged as a cache hit.
    pub fn as_cache_hit(mut self) -> Self {
        self.from_cache = true;
        self
    }

    /// Deserialize the payload into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Non-zero numeric application-level error code embedded in the payload.
    pub fn error_code(&self) -> Option<i64> {
        let code = match self.payload.get("error_code")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        code.filter(|c| *c != 0)
    }

    /// Whether the payload flags an application-level error.
    ///
    /// Any `error_code` other than null, `false`, zero or an empty value
    /// counts, including non-numeric codes such as `"E1"`.
    pub fn has_error_code(&self) -> bool {
        match self.payload.get("error_code") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => {
                let s = s.trim();
                !s.is_empty() && s.parse::<f64>().map_or(true, |v| v != 0.0)
            }
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.payload.get("error_message").and_then(Value::as_str)
    }

    /// The structured error carried by an otherwise successful payload.
    pub fn embedded_error(&self) -> Option<FredError> {
        if !self.has_error_code() {
            return None;
        }
        Some(FredError::Api {
            status: self.status,
            code: self.error_code(),
            message: redact_secrets(self.error_message().unwrap_or("upstream reported an error")),
        })
    }

    /// `Err` when the payload carries an embedded error, `Ok(self)` otherwise.
    pub fn into_result(self) -> Result<Self> {
        match self.embedded_error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
