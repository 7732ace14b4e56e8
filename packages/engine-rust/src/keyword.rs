//! The [`Keyword`] trait, its per-call [`KeywordContext`], and the
//! [`KeywordFault`] type hooks are classified with.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keyword_core::{KeywordDescriptor, Payload, Properties, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::output::OutputBuilder;
use crate::session::Session;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Point of the hook/run sequence a worker is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Before,
    Run,
    After,
}

impl Stage {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Stage::Before,
            1 => Stage::Run,
            _ => Stage::After,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Stage::Before => 0,
            Stage::Run => 1,
            Stage::After => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Before => write!(f, "before"),
            Stage::Run => write!(f, "run"),
            Stage::After => write!(f, "after"),
        }
    }
}

/// Stage shared between a worker and its supervisor, read when a timeout
/// snapshot is taken.
#[derive(Debug, Default)]
pub(crate) struct StageTracker(AtomicU8);

impl StageTracker {
    pub(crate) fn enter(&self, stage: Stage) {
        self.0.store(stage.as_u8(), Ordering::Release);
    }

    pub(crate) fn current(&self) -> Stage {
        Stage::from_u8(self.0.load(Ordering::Acquire))
    }
}

// ---------------------------------------------------------------------------
// KeywordFault
// ---------------------------------------------------------------------------

/// A fault raised by keyword code during one stage.
#[derive(Debug, thiserror::Error)]
pub enum KeywordFault {
    /// A hook or the target returned an error.
    #[error("{stage} failed: {source}")]
    Failed {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
    /// A hook or the target panicked.
    #[error("{stage} panicked: {message}")]
    Panicked { stage: Stage, message: String },
}

impl KeywordFault {
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            KeywordFault::Failed { stage, .. } | KeywordFault::Panicked { stage, .. } => *stage,
        }
    }

    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, KeywordFault::Panicked { .. })
    }

    /// Message of the underlying cause, without the stage wrapper.
    #[must_use]
    pub fn cause_message(&self) -> String {
        match self {
            KeywordFault::Failed { source, .. } => source.to_string(),
            KeywordFault::Panicked { message, .. } => message.clone(),
        }
    }

    /// Full diagnostic text: the cause chain for errors, the payload for panics.
    #[must_use]
    pub fn dump(&self) -> String {
        match self {
            KeywordFault::Failed { stage, source } => format!("fault in {stage}: {source:?}"),
            KeywordFault::Panicked { stage, message } => format!("panic in {stage}: {message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// KeywordContext
// ---------------------------------------------------------------------------

/// Everything a keyword sees during one invocation.
///
/// Built fresh per call. Property values have already been resolved and,
/// when validation was requested, filtered down to the declared ones.
/// Clones share the session, output, stage and cancellation token of the
/// same invocation.
#[derive(Clone)]
pub struct KeywordContext {
    descriptor: Arc<KeywordDescriptor>,
    invocation_id: Uuid,
    input: Payload,
    properties: Properties,
    session: Arc<Session>,
    output: Arc<OutputBuilder>,
    cancellation: CancellationToken,
    stage: Arc<StageTracker>,
}

impl KeywordContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        descriptor: Arc<KeywordDescriptor>,
        invocation_id: Uuid,
        input: Payload,
        properties: Properties,
        session: Arc<Session>,
        output: Arc<OutputBuilder>,
        cancellation: CancellationToken,
        stage: Arc<StageTracker>,
    ) -> Self {
        Self {
            descriptor,
            invocation_id,
            input,
            properties,
            session,
            output,
            cancellation,
            stage,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &KeywordDescriptor {
        &self.descriptor
    }

    /// Resolved name of the running keyword.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    #[must_use]
    pub fn input(&self) -> &Payload {
        &self.input
    }

    #[must_use]
    pub fn input_value(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    /// String input field; `None` if absent or not a string.
    #[must_use]
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn output(&self) -> &OutputBuilder {
        &self.output
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage.current()
    }

    pub(crate) fn enter_stage(&self, stage: Stage) {
        self.stage.enter(stage);
    }

    /// Set once the invocation deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Completes when the invocation is cancelled. Long-running keywords
    /// should `select!` on this to stop promptly after a timeout.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl fmt::Debug for KeywordContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordContext")
            .field("keyword", &self.descriptor.name)
            .field("invocation_id", &self.invocation_id)
            .field("stage", &self.stage())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Keyword trait
// ---------------------------------------------------------------------------

/// A named operation the engine can invoke.
///
/// A fresh instance is created for every invocation, so `&mut self` state
/// never leaks between calls. Hooks default to no-ops and `on_error` to
/// propagating every fault.
///
/// Hooks run as tasks on the caller's runtime and must not block: a hook
/// stuck in synchronous work holds a runtime thread, and on a current-thread
/// runtime that stops the deadline from firing. Move blocking work to
/// [`tokio::task::spawn_blocking`], or register the keyword with
/// [`KeywordDefinition::from_fn`](crate::KeywordDefinition::from_fn), which
/// runs its body on the blocking pool.
#[async_trait]
pub trait Keyword: Send + 'static {
    /// Runs before the target. A failure skips both `run` and `after`.
    async fn before(&mut self, _ctx: &KeywordContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The keyword body.
    async fn run(&mut self, ctx: &KeywordContext) -> anyhow::Result<()>;

    /// Runs after the target, whether it succeeded or not.
    async fn after(&mut self, _ctx: &KeywordContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Offered every fault raised by the hooks or the target. Returning
    /// `true` reports it as a technical error; `false` swallows it and keeps
    /// whatever the keyword wrote to its output (for example a business
    /// error set from here).
    fn on_error(&mut self, _ctx: &KeywordContext, _fault: &KeywordFault) -> bool {
        true
    }
}

/// Adapter turning a synchronous closure into a [`Keyword`].
///
/// The closure runs on the blocking pool, so it may block without stalling
/// the runtime that enforces the deadline.
pub(crate) struct FnKeyword<F> {
    f: Arc<F>,
}

impl<F> FnKeyword<F> {
    pub(crate) fn new(f: Arc<F>) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Keyword for FnKeyword<F>
where
    F: Fn(&KeywordContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn run(&mut self, ctx: &KeywordContext) -> anyhow::Result<()> {
        let f = Arc::clone(&self.f);
        let ctx = ctx.clone();
        match tokio::task::spawn_blocking(move || f(&ctx)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(anyhow::anyhow!("keyword body did not complete: {e}")),
        }
    }
}
