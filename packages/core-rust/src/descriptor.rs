use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Timeout applied to keywords that declare none, in milliseconds.
pub const DEFAULT_KEYWORD_TIMEOUT_MS: u64 = 180_000;

/// Registered description of one keyword.
///
/// Created once at registration time and shared behind an `Arc` afterwards;
/// nothing mutates a descriptor once the registry has published it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordDescriptor {
    /// Resolved keyword name: the explicit name if one was declared,
    /// otherwise the operation identifier. Unique within a registry snapshot.
    pub name: String,
    /// Identifier of the operation inside its module (e.g. a function name).
    pub identifier: String,
    /// Name of the module the keyword was registered from.
    pub module: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON schema of the expected input, if declared.
    pub schema: Option<Value>,
    /// Property key templates that must resolve for the keyword to run.
    pub required_properties: Vec<String>,
    /// Property key templates copied through when they resolve.
    pub optional_properties: Vec<String>,
    /// Default call timeout in milliseconds.
    pub timeout_ms: u64,
    /// Routing tags used by schedulers to pick an agent.
    pub routing: Vec<String>,
}

impl KeywordDescriptor {
    /// Returns the wire shape consumed by capability/schema registration.
    #[must_use]
    pub fn export(&self) -> DescriptorExport {
        DescriptorExport {
            name: self.name.clone(),
            description: self.description.clone(),
            schema: self.schema.clone(),
            required_properties: self.required_properties.clone(),
            optional_properties: self.optional_properties.clone(),
            timeout_millis: self.timeout_ms,
            routing: self.routing.clone(),
        }
    }
}

/// Serializable descriptor view: `{ name, description, schema,
/// requiredProperties, optionalProperties, timeoutMillis, routing }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorExport {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Option<Value>,
    #[serde(default)]
    pub required_properties: Vec<String>,
    #[serde(default)]
    pub optional_properties: Vec<String>,
    pub timeout_millis: u64,
    #[serde(default)]
    pub routing: Vec<String>,
}
