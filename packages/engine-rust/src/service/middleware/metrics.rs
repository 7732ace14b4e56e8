//! Metrics middleware for invocations.
//!
//! Wraps each call in a `tracing` span, logs one line on completion, and
//! records `keyword_invocations_total` (labelled by outcome) and
//! `keyword_invocation_duration_ms` through the `metrics` facade. No
//! exporter is installed here; that is the host's choice.

use std::task::{Context, Poll};
use std::time::Instant;

use keyword_core::ExecutionResult;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::invoker::outcome_label;
use crate::service::{InvocationFuture, InvocationRequest};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments invocations with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records invocation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<InvocationRequest> for MetricsService<S>
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
        let keyword = request.invocation.target.clone();

        let span = info_span!(
            "invocation",
            keyword = %keyword,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = match &result {
                    Ok(r) => outcome_label(r),
                    Err(never) => match *never {},
                };

                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                ::metrics::counter!("keyword_invocations_total", "outcome" => outcome).increment(1);
                #[allow(clippy::cast_precision_loss)]
                ::metrics::histogram!("keyword_invocation_duration_ms").record(duration_ms as f64);

                tracing::info!(
                    keyword = %keyword,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "invocation complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
