//! Keyword Core: descriptors, invocation requests, and execution results.
//!
//! This crate carries the data model shared by the engine and whatever
//! transport sits in front of it. Everything here is plain data with serde
//! wire shapes; behavior lives in `keyword-engine`.

pub mod clock;
pub mod descriptor;
pub mod report;
pub mod request;
pub mod types;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use descriptor::{DescriptorExport, KeywordDescriptor, DEFAULT_KEYWORD_TIMEOUT_MS};
pub use report::{
    error_codes, Attachment, ErrorKind, ExecutionError, ExecutionResult, Measure, MeasureStatus,
};
pub use request::Invocation;
pub use types::{value_as_text, MeasureData, Payload, Properties, Value};
