//! Concurrency limit for the invocation stack.
//!
//! Each admitted invocation holds one permit until its result is ready. An
//! invocation arriving with no permit left never reaches the invoker: it is
//! answered at once with a technical error coded `OVERLOADED`.

use std::sync::Arc;
use std::task::{Context, Poll};

use keyword_core::{error_codes, ExecutionError, ExecutionResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::warn;

use crate::config::EngineConfig;
use crate::service::{InvocationFuture, InvocationRequest};

/// Error message of a shed invocation.
pub const OVERLOADED_MESSAGE: &str = "Engine overloaded, try again later";

/// Result returned in place of a shed invocation.
fn overloaded() -> ExecutionResult {
    ExecutionResult::from_error(
        ExecutionError::technical(OVERLOADED_MESSAGE).with_code(error_codes::OVERLOADED),
    )
}

/// Caps the number of invocations in flight. Services built from clones of
/// one layer share the same permits.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    permits: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight as usize)),
        }
    }

    /// Limit taken from [`EngineConfig::max_concurrent_invocations`].
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_concurrent_invocations)
    }

    /// Invocations that could still be admitted right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            permits: Arc::clone(&self.permits),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    permits: Arc<Semaphore>,
}

impl<S> LoadShedService<S> {
    fn admit(&self, request: &InvocationRequest) -> Option<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok();
        if permit.is_none() {
            warn!(
                keyword = %request.invocation.target,
                "invocation shed, engine overloaded"
            );
        }
        permit
    }
}

impl<S> Service<InvocationRequest> for LoadShedService<S>
where
    S: Service<InvocationRequest, Response = ExecutionResult, Error = std::convert::Infallible>
        + Send,
    S::Future: Send + 'static,
{
    type Response = ExecutionResult;
    type Error = std::convert::Infallible;
    type Future = InvocationFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: InvocationRequest) -> Self::Future {
        let Some(permit) = self.admit(&request) else {
            return Box::pin(async { Ok(overloaded()) });
        };
        let invocation = self.inner.call(request);
        Box::pin(async move {
            let result = invocation.await;
            drop(permit);
            result
        })
    }
}
