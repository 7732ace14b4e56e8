//! Snapshots of a worker taken when its deadline elapses.

use std::fmt::Write as _;
use std::time::Duration;

use keyword_core::Attachment;
use uuid::Uuid;

use crate::keyword::Stage;

/// Name of the attachment carrying a timeout snapshot.
pub const INTERRUPTION_ATTACHMENT: &str = "stacktrace_before_interruption.log";

/// What the supervisor knows about a worker that overran its deadline.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub keyword: String,
    pub invocation_id: Uuid,
    pub stage: Stage,
    pub elapsed: Duration,
    /// Measures still open, outermost first.
    pub open_measures: Vec<String>,
}

impl WorkerSnapshot {
    /// Human-readable report, one fact per line.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "keyword: {}", self.keyword);
        let _ = writeln!(out, "invocation: {}", self.invocation_id);
        let _ = writeln!(out, "stage: {}", self.stage);
        let _ = writeln!(out, "elapsed: {}ms", self.elapsed.as_millis());
        if self.open_measures.is_empty() {
            let _ = writeln!(out, "open measures: none");
        } else {
            let _ = writeln!(out, "open measures:");
            for (depth, name) in self.open_measures.iter().enumerate() {
                let _ = writeln!(out, "{:indent$}- {name}", "", indent = depth * 2);
            }
        }
        out
    }
}

/// Captures diagnostics for a worker about to be cancelled.
pub trait DiagnosticCapture: Send + Sync {
    /// Returns the attachment to add to the timeout result, if any.
    fn capture(&self, snapshot: &WorkerSnapshot) -> Option<Attachment>;
}

/// Attaches [`WorkerSnapshot::render`] as
/// `stacktrace_before_interruption.log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotDiagnostics;

impl DiagnosticCapture for SnapshotDiagnostics {
    fn capture(&self, snapshot: &WorkerSnapshot) -> Option<Attachment> {
        Some(Attachment::from_text(INTERRUPTION_ATTACHMENT, &snapshot.render()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiagnostics;

impl DiagnosticCapture for NoDiagnostics {
    fn capture(&self, _snapshot: &WorkerSnapshot) -> Option<Attachment> {
        None
    }
}
