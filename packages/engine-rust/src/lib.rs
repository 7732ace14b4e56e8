//! Keyword Engine: registry, property resolution, sessions, and bounded
//! keyword invocation.
//!
//! A [`KeywordRegistry`] is filled from [`KeywordModule`]s. An [`Invoker`]
//! takes an [`Invocation`](keyword_core::Invocation), resolves the keyword's
//! properties, runs its hooks and body on an isolated task under a deadline,
//! and always answers with an [`ExecutionResult`](keyword_core::ExecutionResult).
//! [`service`] exposes the invoker as a `tower` stack and [`KeywordRunner`]
//! wraps everything for in-process use.

pub mod config;
pub mod invoker;
pub mod keyword;
pub mod logging;
pub mod output;
pub mod properties;
pub mod registry;
pub mod runner;
pub mod service;
pub mod session;

pub use config::EngineConfig;
pub use invoker::{DiagnosticCapture, Invoker, NoDiagnostics, SnapshotDiagnostics, WorkerSnapshot};
pub use keyword::{Keyword, KeywordContext, KeywordFault, Stage};
pub use output::OutputBuilder;
pub use properties::{PropertyError, Resolution, VALIDATE_PROPERTIES};
pub use registry::{
    KeywordDefinition, KeywordEntry, KeywordModule, KeywordRegistry, KeywordSet, LookupError,
    RegistryError,
};
pub use runner::{KeywordRunner, RunnerError};
pub use service::{build_invocation_pipeline, InvocationRequest, InvokerService};
pub use session::{Closeable, Session, SessionError};
