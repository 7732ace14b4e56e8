//! Pipeline composition: combines all middleware layers into a single service stack.

use std::convert::Infallible;
use std::sync::Arc;

use keyword_core::ExecutionResult;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use crate::config::EngineConfig;
use crate::invoker::Invoker;
use crate::service::{InvocationRequest, InvokerService};

/// Build the invocation pipeline by wrapping an [`InvokerService`] with
/// middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- answer with an overload result when saturated
/// 2. `MetricsLayer` -- record timing and outcome
///
/// Deadlines are enforced by the invoker itself, per keyword.
#[must_use]
pub fn build_invocation_pipeline(
    invoker: Arc<Invoker>,
    config: &EngineConfig,
) -> impl tower::Service<
    InvocationRequest,
    Response = ExecutionResult,
    Error = Infallible,
    Future = crate::service::InvocationFuture,
> + Clone {
    ServiceBuilder::new()
        .layer(LoadShedLayer::from_config(config))
        .layer(MetricsLayer)
        .service(InvokerService::new(invoker))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
