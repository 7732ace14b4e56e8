use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Payload, Properties};

/// A request to run one keyword.
///
/// Wire shape: `{ target, payload, properties, callTimeoutMillis,
/// validateProperties, alwaysPropagateError }`. Only `target` is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    /// Name of the keyword to run.
    pub target: String,
    #[serde(default)]
    pub payload: Payload,
    /// Caller properties, merged over the engine's context properties.
    #[serde(default)]
    pub properties: Properties,
    /// Per-call timeout override; `None` or 0 means the descriptor default.
    #[serde(default)]
    pub call_timeout_millis: Option<u64>,
    /// Opt into required/optional property validation.
    #[serde(default)]
    pub validate_properties: bool,
    /// Report every keyword fault as a technical error, whatever the
    /// keyword's own error hook decides.
    #[serde(default)]
    pub always_propagate_error: bool,
}

impl Invocation {
    /// Creates an invocation of `target` with an empty payload.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_millis = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn validating(mut self) -> Self {
        self.validate_properties = true;
        self
    }

    #[must_use]
    pub fn always_propagating(mut self) -> Self {
        self.always_propagate_error = true;
        self
    }

    /// Effective timeout: the override when set and non-zero, else `default_ms`.
    #[must_use]
    pub fn timeout_ms(&self, default_ms: u64) -> u64 {
        match self.call_timeout_millis {
            Some(ms) if ms > 0 => ms,
            _ => default_ms,
        }
    }
}
