//! Tower middleware layers for the invocation pipeline.
//!
//! - [`load_shed`]: Semaphore-based concurrency limiting
//! - [`metrics`]: Per-invocation span, log line, counters and histogram
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use load_shed::{LoadShedLayer, OVERLOADED_MESSAGE};
pub use metrics::MetricsLayer;
pub use pipeline::build_invocation_pipeline;
