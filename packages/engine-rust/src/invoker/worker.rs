//! The hook/run sequence executed on a worker task.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::debug;

use super::classify::{panic_message, FaultClassifier};
use crate::keyword::{Keyword, KeywordContext, KeywordFault, Stage};

/// Runs `before`, `run`, and `after` in order, classifying every fault.
///
/// A failed `before` skips the rest. `after` runs whether `run` succeeded
/// or not.
pub(crate) async fn run_sequence(
    mut keyword: Box<dyn Keyword>,
    ctx: KeywordContext,
    classifier: FaultClassifier,
) {
    ctx.enter_stage(Stage::Before);
    if let Err(fault) = guarded(Stage::Before, keyword.before(&ctx)).await {
        classifier.handle(keyword.as_mut(), &ctx, &fault);
        debug!(keyword = ctx.name(), "before hook failed, skipping keyword");
        return;
    }

    ctx.enter_stage(Stage::Run);
    if let Err(fault) = guarded(Stage::Run, keyword.run(&ctx)).await {
        classifier.handle(keyword.as_mut(), &ctx, &fault);
    }

    ctx.enter_stage(Stage::After);
    if let Err(fault) = guarded(Stage::After, keyword.after(&ctx)).await {
        classifier.handle(keyword.as_mut(), &ctx, &fault);
    }
}

/// Awaits one stage, turning both errors and panics into a [`KeywordFault`].
async fn guarded<F>(stage: Stage, fut: F) -> Result<(), KeywordFault>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(KeywordFault::Failed { stage, source }),
        Err(payload) => Err(KeywordFault::Panicked {
            stage,
            message: panic_message(payload.as_ref()),
        }),
    }
}
