//! In-process harness for running keywords without a transport.
//!
//! A [`KeywordRunner`] owns a registry, an invoker, and one session shared by
//! every run, which makes it the natural fixture for keyword unit tests.

use std::sync::Arc;

use keyword_core::{ExecutionResult, Invocation, Payload, Properties, Value};
use tracing::error;

use crate::config::EngineConfig;
use crate::invoker::Invoker;
use crate::registry::{KeywordModule, KeywordRegistry, RegistryError};
use crate::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Please specify at least one module containing the keyword definitions")]
    NoModules,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("invalid keyword input: {0}")]
    InvalidInput(#[from] serde_json::Error),
    #[error("keyword input must be a JSON object")]
    NotAnObject,
}

/// Runs keywords from a fixed set of modules against a shared session.
pub struct KeywordRunner {
    invoker: Invoker,
    session: Arc<Session>,
    always_propagate_error: bool,
}

impl KeywordRunner {
    /// Creates a runner over `modules` with the default engine configuration.
    ///
    /// # Errors
    ///
    /// [`RunnerError::NoModules`] if `modules` is empty, or the registry
    /// error of the first module that fails to register.
    pub fn new(
        modules: &[&dyn KeywordModule],
        context_properties: Properties,
    ) -> Result<Self, RunnerError> {
        Self::with_config(modules, context_properties, EngineConfig::default())
    }

    /// # Errors
    ///
    /// Same as [`KeywordRunner::new`].
    pub fn with_config(
        modules: &[&dyn KeywordModule],
        context_properties: Properties,
        config: EngineConfig,
    ) -> Result<Self, RunnerError> {
        if modules.is_empty() {
            return Err(RunnerError::NoModules);
        }
        let registry = Arc::new(KeywordRegistry::from_config(&config));
        for module in modules {
            registry.register(*module)?;
        }
        let invoker =
            Invoker::new(registry, Arc::new(config)).with_context_properties(context_properties);
        Ok(Self {
            invoker,
            session: Arc::new(Session::new()),
            always_propagate_error: true,
        })
    }

    /// Whether every keyword fault is reported as a technical error,
    /// regardless of the keyword's error hook. On by default.
    #[must_use]
    pub fn always_propagate_error(mut self, enabled: bool) -> Self {
        self.always_propagate_error = enabled;
        self
    }

    /// Runs `keyword` with a JSON object as input.
    ///
    /// # Errors
    ///
    /// Returns an error if `input` is not a JSON object. Keyword failures are
    /// reported in the returned result, not as an `Err`.
    pub async fn run(&self, keyword: &str, input: &str) -> Result<ExecutionResult, RunnerError> {
        let payload = match serde_json::from_str::<Value>(input)? {
            Value::Object(payload) => payload,
            _ => return Err(RunnerError::NotAnObject),
        };
        Ok(self.run_with(keyword, payload, Properties::new()).await)
    }

    /// Runs `keyword` with a payload and call properties.
    pub async fn run_with(
        &self,
        keyword: &str,
        payload: Payload,
        properties: Properties,
    ) -> ExecutionResult {
        let mut invocation = Invocation::new(keyword)
            .with_payload(payload)
            .with_properties(properties);
        invocation.always_propagate_error = self.always_propagate_error;
        self.invoke(invocation).await
    }

    /// Runs a fully specified invocation against the runner's session.
    pub async fn invoke(&self, invocation: Invocation) -> ExecutionResult {
        let result = self.invoker.invoke(invocation, Arc::clone(&self.session)).await;
        if let Some(e) = &result.error {
            error!(error = %e, "keyword error occurred");
        }
        result
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<KeywordRegistry> {
        self.invoker.registry()
    }

    /// Closes the shared session and every closeable object in it.
    pub fn close(&self) {
        self.session.close();
    }
}

impl std::fmt::Debug for KeywordRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordRunner")
            .field("invoker", &self.invoker)
            .field("session", &self.session)
            .field("always_propagate_error", &self.always_propagate_error)
            .finish()
    }
}
