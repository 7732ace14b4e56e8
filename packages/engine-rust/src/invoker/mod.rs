//! Bounded keyword invocation.
//!
//! The [`Invoker`] looks a keyword up, resolves its properties, and runs its
//! hook/run sequence on a dedicated tokio task while it waits on either the
//! task or the deadline. Every outcome, including unknown keywords, property
//! errors, faults, panics, and timeouts, comes back as an [`ExecutionResult`].
//!
//! Cancellation is cooperative: on timeout the keyword's cancellation token
//! is triggered and the worker gets a short grace period to acknowledge it.
//! A worker that ignores the token keeps running detached and may still
//! write to its session and output after the result has been returned.

mod classify;
mod diagnostics;
mod worker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use keyword_core::{
    error_codes, ClockSource, ExecutionError, ExecutionResult, Invocation, KeywordDescriptor,
    Properties, SystemClock,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

pub use classify::EMPTY_ERROR_MESSAGE;
pub use diagnostics::{
    DiagnosticCapture, NoDiagnostics, SnapshotDiagnostics, WorkerSnapshot, INTERRUPTION_ATTACHMENT,
};

use crate::config::EngineConfig;
use crate::keyword::{KeywordContext, StageTracker};
use crate::output::OutputBuilder;
use crate::properties::{self, VALIDATE_PROPERTIES};
use crate::registry::{KeywordRegistry, LookupError};
use crate::session::Session;

use self::classify::FaultClassifier;

/// Short label of a result, used in spans and logs.
#[must_use]
pub fn outcome_label(result: &ExecutionResult) -> &'static str {
    match &result.error {
        None => "ok",
        Some(e) if e.is_business() => "business_error",
        Some(e) if e.code == error_codes::TIMEOUT_INTERRUPTED
            || e.code == error_codes::TIMEOUT_NOT_INTERRUPTED =>
        {
            "timeout"
        }
        Some(_) => "technical_error",
    }
}

/// Runs keywords from a registry under per-call deadlines.
pub struct Invoker {
    registry: Arc<KeywordRegistry>,
    config: Arc<EngineConfig>,
    context_properties: Properties,
    clock: Arc<dyn ClockSource>,
    diagnostics: Arc<dyn DiagnosticCapture>,
}

impl Invoker {
    #[must_use]
    pub fn new(registry: Arc<KeywordRegistry>, config: Arc<EngineConfig>) -> Self {
        Self {
            registry,
            config,
            context_properties: Properties::new(),
            clock: Arc::new(SystemClock),
            diagnostics: Arc::new(SnapshotDiagnostics),
        }
    }

    /// Properties every invocation starts from; caller properties override
    /// them key by key.
    #[must_use]
    pub fn with_context_properties(mut self, properties: Properties) -> Self {
        self.context_properties = properties;
        self
    }

    /// Clock used to stamp measures.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticCapture>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<KeywordRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one invocation to completion or deadline.
    ///
    /// Never panics on keyword faults and never returns early: the result
    /// always describes what happened.
    pub async fn invoke(&self, invocation: Invocation, session: Arc<Session>) -> ExecutionResult {
        let invocation_id = Uuid::new_v4();
        let span = info_span!(
            "keyword",
            keyword = %invocation.target,
            invocation_id = %invocation_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = self.invoke_inner(invocation, session, invocation_id).await;

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            let outcome = outcome_label(&result);
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            debug!(duration_ms, outcome, "keyword invocation complete");
            result
        }
        .instrument(span)
        .await
    }

    async fn invoke_inner(
        &self,
        invocation: Invocation,
        session: Arc<Session>,
        invocation_id: Uuid,
    ) -> ExecutionResult {
        let entry = match self.registry.lookup(&invocation.target) {
            Ok(entry) => entry,
            Err(e) => {
                if matches!(e, LookupError::Empty) {
                    warn!("invoked with an empty keyword registry");
                }
                let not_found = LookupError::NotFound {
                    name: invocation.target.clone(),
                };
                return ExecutionResult::from_error(
                    ExecutionError::technical(not_found.to_string())
                        .with_code(error_codes::KEYWORD_NOT_FOUND),
                );
            }
        };
        let descriptor = Arc::clone(entry.descriptor());

        let mut merged = properties::merge(&self.context_properties, &invocation.properties);
        if invocation.validate_properties {
            merged.insert(VALIDATE_PROPERTIES.to_string(), "true".to_string());
        }
        let resolved =
            match properties::effective_properties(&descriptor, &invocation.payload, merged) {
                Ok(resolved) => resolved,
                Err(e) => {
                    debug!(error = %e, "property resolution failed");
                    return ExecutionResult::from_error(ExecutionError::business(e.to_string()));
                }
            };

        let timeout_ms = invocation.timeout_ms(descriptor.timeout_ms);
        let output = Arc::new(OutputBuilder::with_clock(Arc::clone(&self.clock)));
        let stage = Arc::new(StageTracker::default());
        let cancellation = CancellationToken::new();
        let ctx = KeywordContext::new(
            Arc::clone(&descriptor),
            invocation_id,
            invocation.payload,
            resolved,
            session,
            Arc::clone(&output),
            cancellation.clone(),
            Arc::clone(&stage),
        );
        let classifier = FaultClassifier::new(invocation.always_propagate_error);

        let start = Instant::now();
        let mut handle = tokio::spawn(
            worker::run_sequence(entry.instantiate(), ctx, classifier).in_current_span(),
        );

        match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut handle).await {
            Ok(Ok(())) => output.build(),
            Ok(Err(join_error)) => {
                error!(error = %join_error, "keyword worker terminated abnormally");
                output.set_error_record(
                    ExecutionError::technical(format!("Keyword worker terminated abnormally: {join_error}"))
                        .with_code(error_codes::UNEXPECTED),
                );
                output.build()
            }
            Err(_) => {
                let snapshot = WorkerSnapshot {
                    keyword: descriptor.name.clone(),
                    invocation_id,
                    stage: stage.current(),
                    elapsed: start.elapsed(),
                    open_measures: output.open_measures(),
                };
                self.interrupt(&descriptor, timeout_ms, &snapshot, &output, &cancellation, handle)
                    .await
            }
        }
    }

    /// Builds the timeout result after asking the worker to stop.
    async fn interrupt(
        &self,
        descriptor: &KeywordDescriptor,
        timeout_ms: u64,
        snapshot: &WorkerSnapshot,
        output: &OutputBuilder,
        cancellation: &CancellationToken,
        handle: JoinHandle<()>,
    ) -> ExecutionResult {
        let attachment = if self.config.capture_diagnostics {
            self.diagnostics.capture(snapshot)
        } else {
            None
        };

        cancellation.cancel();
        let interrupted = tokio::time::timeout(self.config.cancellation_grace(), handle)
            .await
            .is_ok();

        let (message, code) = if interrupted {
            (
                format!(
                    "Timeout after {timeout_ms}ms while processing request. Request execution interrupted successfully."
                ),
                error_codes::TIMEOUT_INTERRUPTED,
            )
        } else {
            (
                format!(
                    "Timeout after {timeout_ms}ms while processing request. WARNING: Request execution couldn't be interrupted and may still be running."
                ),
                error_codes::TIMEOUT_NOT_INTERRUPTED,
            )
        };
        warn!(
            keyword = %descriptor.name,
            timeout_ms,
            interrupted,
            stage = %snapshot.stage,
            "keyword timed out"
        );
        metrics::counter!(
            "keyword_timeouts_total",
            "interrupted" => if interrupted { "true" } else { "false" }
        )
        .increment(1);

        let mut result = output.build();
        result.attachments.extend(attachment);
        result.error = Some(ExecutionError::technical(message).with_code(code));
        result
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("keywords", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use keyword_core::{ErrorKind, ManualClock, Payload};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::keyword::{Keyword, KeywordFault};
    use crate::output::EXCEPTION_ATTACHMENT;
    use crate::registry::{KeywordDefinition, KeywordSet};

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Keyword whose hooks and body fail on demand and log what ran.
    #[derive(Clone, Default)]
    struct Scripted {
        journal: Journal,
        fail_before: bool,
        fail_run: Option<&'static str>,
        fail_after: bool,
        panic_run: bool,
        /// Value returned by `on_error`.
        propagate: bool,
        /// Business error reported from `on_error` when swallowing.
        business_on_error: Option<&'static str>,
    }

    #[async_trait]
    impl Keyword for Scripted {
        async fn before(&mut self, _ctx: &KeywordContext) -> anyhow::Result<()> {
            self.journal.lock().push("before".to_string());
            if self.fail_before {
                anyhow::bail!("before failed");
            }
            Ok(())
        }

        async fn run(&mut self, ctx: &KeywordContext) -> anyhow::Result<()> {
            self.journal.lock().push("run".to_string());
            ctx.output().add("ran", true);
            if self.panic_run {
                panic!("run exploded");
            }
            match self.fail_run {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            }
        }

        async fn after(&mut self, _ctx: &KeywordContext) -> anyhow::Result<()> {
            self.journal.lock().push("after".to_string());
            if self.fail_after {
                anyhow::bail!("after failed");
            }
            Ok(())
        }

        fn on_error(&mut self, ctx: &KeywordContext, fault: &KeywordFault) -> bool {
            self.journal.lock().push(format!("on_error:{}", fault.stage()));
            if let Some(message) = self.business_on_error {
                ctx.output().set_business_error(message);
            }
            self.propagate
        }
    }

    fn engine(module: KeywordSet) -> Invoker {
        engine_with(module, EngineConfig::default())
    }

    fn engine_with(module: KeywordSet, config: EngineConfig) -> Invoker {
        let registry = Arc::new(KeywordRegistry::from_config(&config));
        registry.register(&module).unwrap();
        Invoker::new(registry, Arc::new(config))
    }

    fn scripted(script: Scripted) -> KeywordSet {
        KeywordSet::new("tests").with(KeywordDefinition::new("Scripted", move || script.clone()))
    }

    async fn invoke(invoker: &Invoker, invocation: Invocation) -> ExecutionResult {
        invoker.invoke(invocation, Arc::new(Session::new())).await
    }

    fn journal_of(script: &Scripted) -> Vec<String> {
        script.journal.lock().clone()
    }

    // -- lookup & properties -------------------------------------------------

    #[tokio::test]
    async fn unknown_keyword_is_technical_not_found() {
        let invoker = engine(KeywordSet::new("m").with(KeywordDefinition::from_fn("known", |_| Ok(()))));
        let result = invoke(&invoker, Invocation::new("unknown")).await;

        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Technical);
        assert_eq!(error.code, error_codes::KEYWORD_NOT_FOUND);
        assert_eq!(error.message, "Could not find keyword named 'unknown'");
    }

    #[tokio::test]
    async fn empty_registry_reports_not_found_too() {
        let invoker = engine(KeywordSet::new("empty"));
        let result = invoke(&invoker, Invocation::new("anything")).await;
        assert_eq!(result.error.unwrap().message, "Could not find keyword named 'anything'");
    }

    #[tokio::test]
    async fn missing_required_property_is_business_and_skips_keyword() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let module = KeywordSet::new("m").with(
            KeywordDefinition::from_fn("needs_props", move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .require("prop1")
            .require("prop2"),
        );
        let invoker = engine(module);

        let result = invoke(
            &invoker,
            Invocation::new("needs_props").with_property("prop1", "v").validating(),
        )
        .await;

        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Business);
        assert!(error.message.contains("prop2"));
        assert!(!error.message.contains("prop1"));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unresolved_placeholder_is_business() {
        let module = KeywordSet::new("m")
            .with(KeywordDefinition::from_fn("k", |_| Ok(())).require("db.{env}.url"));
        let invoker = engine(module);

        let result = invoke(&invoker, Invocation::new("k").validating()).await;
        let error = result.error.unwrap();
        assert!(error.is_business());
        assert_eq!(
            error.message,
            "The Keyword is missing the following property or input 'env'"
        );
    }

    #[tokio::test]
    async fn validated_properties_are_filtered_to_declared_keys() {
        let module = KeywordSet::new("m").with(
            KeywordDefinition::from_fn("k", |ctx| {
                let mut keys: Vec<&String> = ctx.properties().keys().collect();
                keys.sort();
                ctx.output().add("keys", json!(keys));
                Ok(())
            })
            .require("db.{env}.url")
            .optional("db.pool"),
        );
        let invoker = engine(module).with_context_properties(Properties::from([
            ("db.prod.url".to_string(), "jdbc://prod".to_string()),
            ("unrelated".to_string(), "x".to_string()),
        ]));

        let mut payload = Payload::new();
        payload.insert("env".to_string(), json!("prod"));
        let result = invoke(&invoker, Invocation::new("k").with_payload(payload).validating()).await;

        assert!(result.is_success());
        assert_eq!(result.payload["keys"], json!(["db.prod.url"]));
    }

    #[tokio::test]
    async fn without_validation_the_merged_context_passes_through() {
        let module = KeywordSet::new("m").with(
            KeywordDefinition::from_fn("k", |ctx| {
                ctx.output().add("a", ctx.property("a").unwrap_or_default());
                ctx.output().add("b", ctx.property("b").unwrap_or_default());
                Ok(())
            })
            .require("never.provided"),
        );
        let invoker = engine(module).with_context_properties(Properties::from([
            ("a".to_string(), "context".to_string()),
            ("b".to_string(), "context".to_string()),
        ]));

        let result = invoke(&invoker, Invocation::new("k").with_property("a", "caller")).await;
        assert!(result.is_success());
        assert_eq!(result.payload["a"], "caller");
        assert_eq!(result.payload["b"], "context");
    }

    #[tokio::test]
    async fn sentinel_in_context_enables_validation() {
        let module = KeywordSet::new("m")
            .with(KeywordDefinition::from_fn("k", |_| Ok(())).require("needed"));
        let invoker = engine(module).with_context_properties(Properties::from([(
            VALIDATE_PROPERTIES.to_string(),
            "true".to_string(),
        )]));

        let result = invoke(&invoker, Invocation::new("k")).await;
        assert!(result.error.unwrap().is_business());
    }

    // -- success path --------------------------------------------------------

    #[tokio::test]
    async fn completed_keyword_returns_payload_and_ordered_measures() {
        let clock = Arc::new(ManualClock::new(1_000));
        let module = KeywordSet::new("m").with(KeywordDefinition::from_fn("measured", |ctx| {
            let out = ctx.output();
            out.start_measure("outer");
            out.start_measure("inner");
            out.stop_measure();
            out.stop_measure();
            out.add_measure("added", 3);
            out.add("key", "value");
            Ok(())
        }));
        let invoker = engine(module).with_clock(clock);

        let result = invoke(&invoker, Invocation::new("measured")).await;
        assert!(result.is_success());
        assert_eq!(result.payload["key"], "value");
        let names: Vec<&str> = result.measures.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "inner", "added"]);
        assert!(result.measures.iter().all(|m| m.begin_epoch_millis == 1_000));
    }

    #[tokio::test]
    async fn session_is_shared_between_invocations() {
        let module = KeywordSet::new("m")
            .with(KeywordDefinition::from_fn("put", |ctx| {
                ctx.session().put("driver", "chrome".to_string())?;
                Ok(())
            }))
            .with(KeywordDefinition::from_fn("get", |ctx| {
                let driver = ctx
                    .session()
                    .get::<String>("driver")?
                    .ok_or_else(|| anyhow::anyhow!("no driver in session"))?;
                ctx.output().add("driver", driver.as_str());
                Ok(())
            }));
        let invoker = engine(module);
        let session = Arc::new(Session::new());

        assert!(invoker.invoke(Invocation::new("put"), Arc::clone(&session)).await.is_success());
        let result = invoker.invoke(Invocation::new("get"), session).await;
        assert_eq!(result.payload["driver"], "chrome");
    }

    #[tokio::test]
    async fn unusable_session_surfaces_as_technical_error() {
        let module = KeywordSet::new("m").with(KeywordDefinition::from_fn("put", |ctx| {
            ctx.session().put("k", 1_u8)?;
            Ok(())
        }));
        let invoker = engine(module);

        let result = invoker.invoke(Invocation::new("put"), Arc::new(Session::unusable())).await;
        let error = result.error.unwrap();
        assert!(error.is_technical());
        assert_eq!(error.message, "no session is available in this execution context");
    }

    // -- fault classification ------------------------------------------------

    #[tokio::test]
    async fn propagated_fault_becomes_technical_with_dump() {
        let script = Scripted {
            fail_run: Some("My exception"),
            propagate: true,
            ..Scripted::default()
        };
        let invoker = engine(scripted(script.clone()));

        let result = invoke(&invoker, Invocation::new("Scripted")).await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Technical);
        assert_eq!(error.message, "My exception");
        assert_eq!(error.code, error_codes::KEYWORD);
        assert_eq!(result.attachments.len(), 1);
        assert_eq!(result.attachments[0].name, EXCEPTION_ATTACHMENT);
        assert_eq!(result.payload["ran"], true);
        assert_eq!(journal_of(&script), vec!["before", "run", "on_error:run", "after"]);
    }

    #[tokio::test]
    async fn swallowed_fault_keeps_output_written_by_hook() {
        let script = Scripted {
            fail_run: Some("element not found"),
            propagate: false,
            business_on_error: Some("Login page did not load"),
            ..Scripted::default()
        };
        let invoker = engine(scripted(script));

        let result = invoke(&invoker, Invocation::new("Scripted")).await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Business);
        assert_eq!(error.message, "Login page did not load");
        assert!(result.attachments.is_empty());
    }

    #[tokio::test]
    async fn swallowed_fault_without_hook_output_is_success() {
        let script = Scripted {
            fail_run: Some("ignored"),
            propagate: false,
            ..Scripted::default()
        };
        let invoker = engine(scripted(script));
        assert!(invoke(&invoker, Invocation::new("Scripted")).await.is_success());
    }

    #[tokio::test]
    async fn always_propagate_overrides_hook_verdict() {
        let script = Scripted {
            fail_run: Some("forced"),
            propagate: false,
            business_on_error: Some("would have been business"),
            ..Scripted::default()
        };
        let invoker = engine(scripted(script.clone()));

        let result = invoke(&invoker, Invocation::new("Scripted").always_propagating()).await;
        let error = result.error.unwrap();
        assert!(error.is_technical());
        assert_eq!(error.message, "forced");
        // The hook was still consulted.
        assert!(journal_of(&script).contains(&"on_error:run".to_string()));
    }

    #[tokio::test]
    async fn before_failure_skips_run_and_after() {
        let script = Scripted {
            fail_before: true,
            propagate: true,
            ..Scripted::default()
        };
        let invoker = engine(scripted(script.clone()));

        let result = invoke(&invoker, Invocation::new("Scripted")).await;
        assert_eq!(result.error.unwrap().message, "before failed");
        assert!(result.payload.get("ran").is_none());
        assert_eq!(journal_of(&script), vec!["before", "on_error:before"]);
    }

    #[tokio::test]
    async fn after_failure_is_reported_when_run_succeeded() {
        let script = Scripted {
            fail_after: true,
            propagate: true,
            ..Scripted::default()
        };
        let invoker = engine(scripted(script));

        let result = invoke(&invoker, Invocation::new("Scripted")).await;
        assert_eq!(result.error.unwrap().message, "after failed");
    }

    #[tokio::test]
    async fn after_failure_does_not_override_earlier_error() {
        let script = Scripted {
            fail_run: Some("run failed first"),
            fail_after: true,
            propagate: true,
            ..Scripted::default()
        };
        let invoker = engine(scripted(script.clone()));

        let result = invoke(&invoker, Invocation::new("Scripted")).await;
        assert_eq!(result.error.unwrap().message, "run failed first");
        assert_eq!(result.attachments.len(), 1);
        assert_eq!(
            journal_of(&script),
            vec!["before", "run", "on_error:run", "after", "on_error:after"]
        );
    }

    #[tokio::test]
    async fn panic_is_caught_and_always_technical() {
        let script = Scripted {
            panic_run: true,
            propagate: false,
            ..Scripted::default()
        };
        let invoker = engine(scripted(script.clone()));

        let result = invoke(&invoker, Invocation::new("Scripted")).await;
        let error = result.error.unwrap();
        assert!(error.is_technical());
        assert_eq!(error.message, "run exploded");
        assert_eq!(journal_of(&script), vec!["before", "run", "on_error:run", "after"]);
    }

    #[tokio::test]
    async fn blank_fault_message_is_replaced() {
        let module = KeywordSet::new("m").with(KeywordDefinition::from_fn("blank", |_| {
            Err(anyhow::anyhow!(""))
        }));
        let invoker = engine(module);

        let result = invoke(&invoker, Invocation::new("blank")).await;
        assert_eq!(result.error.unwrap().message, EMPTY_ERROR_MESSAGE);
    }

    // -- timeouts ------------------------------------------------------------

    /// Sleeps far past any test deadline; optionally watches for cancellation.
    struct Sleeper {
        cooperative: bool,
    }

    #[async_trait]
    impl Keyword for Sleeper {
        async fn run(&mut self, ctx: &KeywordContext) -> anyhow::Result<()> {
            ctx.output().start_measure("waiting");
            if self.cooperative {
                tokio::select! {
                    () = ctx.cancelled() => return Ok(()),
                    () = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
            } else {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            ctx.output().add("late", true);
            Ok(())
        }
    }

    fn sleepers() -> KeywordSet {
        KeywordSet::new("m")
            .with(KeywordDefinition::new("cooperative", || Sleeper { cooperative: true }))
            .with(KeywordDefinition::new("stubborn", || Sleeper { cooperative: false }))
            .with(
                KeywordDefinition::new("short_default", || Sleeper { cooperative: true })
                    .timeout(Duration::from_millis(30)),
            )
    }

    fn timeout_config() -> EngineConfig {
        EngineConfig {
            cancellation_grace_ms: 20,
            ..EngineConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_keyword_is_interrupted() {
        let invoker = engine_with(sleepers(), timeout_config());

        let result = invoke(
            &invoker,
            Invocation::new("cooperative").with_timeout(Duration::from_millis(50)),
        )
        .await;

        let error = result.error.as_ref().unwrap();
        assert!(error.is_technical());
        assert_eq!(error.code, error_codes::TIMEOUT_INTERRUPTED);
        assert_eq!(
            error.message,
            "Timeout after 50ms while processing request. Request execution interrupted successfully."
        );
        let snapshot = result.attachment(INTERRUPTION_ATTACHMENT).unwrap();
        let text = String::from_utf8(snapshot.content().unwrap()).unwrap();
        assert!(text.contains("keyword: cooperative"));
        assert!(text.contains("stage: run"));
        assert!(text.contains("- waiting"));
    }

    #[tokio::test(start_paused = true)]
    async fn uncooperative_keyword_is_reported_as_leaked() {
        let invoker = engine_with(sleepers(), timeout_config());

        let result = invoke(
            &invoker,
            Invocation::new("stubborn").with_timeout(Duration::from_millis(50)),
        )
        .await;

        let error = result.error.unwrap();
        assert_eq!(error.code, error_codes::TIMEOUT_NOT_INTERRUPTED);
        assert!(error.message.contains("couldn't be interrupted"));
        assert_eq!(outcome_label(&ExecutionResult::from_error(error)), "timeout");
    }

    #[tokio::test]
    async fn blocking_closure_cannot_hold_the_caller_past_its_deadline() {
        let module = KeywordSet::new("m").with(KeywordDefinition::from_fn("block", |ctx| {
            std::thread::sleep(Duration::from_millis(1000));
            ctx.output().add("late", true);
            Ok(())
        }));
        let invoker = engine_with(module, timeout_config());

        let start = Instant::now();
        let result = invoke(
            &invoker,
            Invocation::new("block").with_timeout(Duration::from_millis(100)),
        )
        .await;
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(800), "caller waited {elapsed:?}");
        assert_eq!(result.error.unwrap().code, error_codes::TIMEOUT_NOT_INTERRUPTED);
        assert!(!result.payload.contains_key("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn descriptor_timeout_applies_without_override() {
        let invoker = engine_with(sleepers(), timeout_config());

        let mut invocation = Invocation::new("short_default");
        invocation.call_timeout_millis = Some(0);
        let result = invoke(&invoker, invocation).await;

        assert!(result
            .error
            .unwrap()
            .message
            .starts_with("Timeout after 30ms while processing request."));
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostics_can_be_disabled() {
        let config = EngineConfig {
            capture_diagnostics: false,
            ..timeout_config()
        };
        let invoker = engine_with(sleepers(), config);
        let result = invoke(
            &invoker,
            Invocation::new("cooperative").with_timeout(Duration::from_millis(10)),
        )
        .await;
        assert!(result.attachments.is_empty());

        let invoker = engine_with(sleepers(), timeout_config()).with_diagnostics(Arc::new(NoDiagnostics));
        let result = invoke(
            &invoker,
            Invocation::new("cooperative").with_timeout(Duration::from_millis(10)),
        )
        .await;
        assert!(result.attachments.is_empty());
        assert!(result.error.is_some());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&ExecutionResult::default()), "ok");
        assert_eq!(
            outcome_label(&ExecutionResult::from_error(ExecutionError::business("b"))),
            "business_error"
        );
        assert_eq!(
            outcome_label(&ExecutionResult::from_error(ExecutionError::technical("t"))),
            "technical_error"
        );
    }
}
