//! `tower` front end for the invoker.
//!
//! [`InvokerService`] adapts an [`Invoker`] to `tower::Service`, and
//! [`middleware`] adds load shedding and per-call metrics around it. The
//! error type is [`Infallible`]: every outcome, overload included, is an
//! [`ExecutionResult`].

pub mod middleware;

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use keyword_core::{ExecutionResult, Invocation};
use tower::Service;

use crate::invoker::Invoker;
use crate::session::Session;

pub use middleware::build_invocation_pipeline;

/// One call through the service stack.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub invocation: Invocation,
    pub session: Arc<Session>,
}

impl InvocationRequest {
    #[must_use]
    pub fn new(invocation: Invocation, session: Arc<Session>) -> Self {
        Self {
            invocation,
            session,
        }
    }
}

/// Boxed future returned by every service in the stack.
pub type InvocationFuture =
    Pin<Box<dyn Future<Output = Result<ExecutionResult, Infallible>> + Send>>;

/// Innermost service: hands the request to the [`Invoker`].
#[derive(Debug, Clone)]
pub struct InvokerService {
    invoker: Arc<Invoker>,
}

impl InvokerService {
    #[must_use]
    pub fn new(invoker: Arc<Invoker>) -> Self {
        Self { invoker }
    }
}

impl Service<InvocationRequest> for InvokerService {
    type Response = ExecutionResult;
    type Error = Infallible;
    type Future = InvocationFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: InvocationRequest) -> Self::Future {
        let invoker = Arc::clone(&self.invoker);
        Box::pin(async move { Ok(invoker.invoke(request.invocation, request.session).await) })
    }
}
