//! Execution results: payload, error, measures, and attachments.
//!
//! These are the shapes handed to the serialization collaborator once an
//! invocation finishes. Field names follow the response wire format
//! (`camelCase`, `BUSINESS`/`TECHNICAL` error kinds, base64 attachment content).

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::types::{MeasureData, Payload};

/// Numeric codes carried by engine-produced errors.
///
/// Keyword code may use any other value through
/// `ExecutionError::with_code`; 0 is the neutral "keyword error" code.
pub mod error_codes {
    /// Error raised or reported by keyword code.
    pub const KEYWORD: i32 = 0;
    /// The deadline elapsed and the worker acknowledged cancellation.
    pub const TIMEOUT_INTERRUPTED: i32 = 1;
    /// The deadline elapsed and the worker may still be running.
    pub const TIMEOUT_NOT_INTERRUPTED: i32 = 2;
    /// No keyword with the requested name is registered.
    pub const KEYWORD_NOT_FOUND: i32 = 3;
    /// The engine rejected the call because too many are in flight.
    pub const OVERLOADED: i32 = 4;
    /// Any other unexpected engine failure.
    pub const UNEXPECTED: i32 = 5;
}

/// Layer tag stamped on errors produced at the keyword boundary.
pub const KEYWORD_LAYER: &str = "keyword";

// ---------------------------------------------------------------------------
// ExecutionError
// ---------------------------------------------------------------------------

/// Error kind, distinguished by intent rather than by fault type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Expected, caller-fixable condition (e.g. a missing property).
    Business,
    /// Unexpected fault: uncaught error, panic, timeout, misconfiguration.
    Technical,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Business => write!(f, "BUSINESS"),
            ErrorKind::Technical => write!(f, "TECHNICAL"),
        }
    }
}

/// The single error an execution result may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: i32,
    /// `true` when this is the root cause rather than a re-reported error.
    pub is_root: bool,
    /// Free-text layer where the error occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}

impl ExecutionError {
    /// Technical error at the keyword layer with the neutral code.
    #[must_use]
    pub fn technical(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Technical, message)
    }

    /// Business error at the keyword layer with the neutral code.
    #[must_use]
    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, message)
    }

    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: error_codes::KEYWORD,
            is_root: true,
            layer: Some(KEYWORD_LAYER.to_string()),
        }
    }

    /// Replaces the numeric code.
    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    #[must_use]
    pub fn is_business(&self) -> bool {
        self.kind == ErrorKind::Business
    }

    #[must_use]
    pub fn is_technical(&self) -> bool {
        self.kind == ErrorKind::Technical
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error{{kind={}, layer='{}', message='{}', code={}, root={}}}",
            self.kind,
            self.layer.as_deref().unwrap_or(""),
            self.message,
            self.code,
            self.is_root
        )
    }
}

// ---------------------------------------------------------------------------
// Measure
// ---------------------------------------------------------------------------

/// Outcome attached to an individual measure.
///
/// Measures without a status are reported with the status of the keyword
/// they belong to; that assignment happens downstream of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasureStatus {
    Passed,
    Failed,
    TechnicalError,
}

/// A named, timed span recorded by a keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub name: String,
    /// Start instant, milliseconds since Unix epoch.
    pub begin_epoch_millis: u64,
    pub duration_millis: u64,
    #[serde(default)]
    pub data: Option<MeasureData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MeasureStatus>,
}

impl Measure {
    #[must_use]
    pub fn new(name: impl Into<String>, begin_epoch_millis: u64, duration_millis: u64) -> Self {
        Self {
            name: name.into(),
            begin_epoch_millis,
            duration_millis,
            data: None,
            status: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: MeasureData) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: MeasureStatus) -> Self {
        self.status = Some(status);
        self
    }
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Binary attachment returned alongside a result (logs, screenshots, dumps).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Content, base64 encoded.
    pub content_base64: String,
    /// Set when the content is an archived directory.
    #[serde(default)]
    pub is_directory: bool,
}

impl Attachment {
    /// Builds an attachment from raw bytes.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            description: None,
            content_base64: STANDARD.encode(bytes),
            is_directory: false,
        }
    }

    /// Builds a UTF-8 text attachment.
    #[must_use]
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self::from_bytes(name, text.as_bytes())
    }

    /// Builds an attachment holding an archived directory.
    #[must_use]
    pub fn directory(name: impl Into<String>, archive: &[u8]) -> Self {
        Self {
            is_directory: true,
            ..Self::from_bytes(name, archive)
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Decodes the base64 content.
    ///
    /// # Errors
    ///
    /// Returns a decode error if `content_base64` is not valid base64, which
    /// can only happen for attachments deserialized from foreign input.
    pub fn content(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.content_base64)
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Immutable outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub payload: Payload,
    pub error: Option<ExecutionError>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ExecutionResult {
    /// A result carrying only the given error.
    #[must_use]
    pub fn from_error(error: ExecutionError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Looks up an attachment by name.
    #[must_use]
    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.name == name)
    }
}
