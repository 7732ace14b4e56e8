//! Turns keyword faults into results.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error};

use crate::keyword::{Keyword, KeywordContext, KeywordFault, Stage};

/// Message reported for a fault whose cause carries no text.
pub const EMPTY_ERROR_MESSAGE: &str = "Empty error message";

/// Decides what happens to each fault raised during one invocation.
pub(crate) struct FaultClassifier {
    always_propagate: bool,
}

impl FaultClassifier {
    pub(crate) fn new(always_propagate: bool) -> Self {
        Self { always_propagate }
    }

    /// Offers `fault` to the keyword's error hook and reports it on the
    /// output if it propagates.
    ///
    /// A propagated fault from `before` or `run` replaces whatever error the
    /// output holds. One from `after` is reported only if no error was set
    /// earlier.
    pub(crate) fn handle(&self, keyword: &mut dyn Keyword, ctx: &KeywordContext, fault: &KeywordFault) {
        if !self.propagates(keyword, ctx, fault) {
            debug!(keyword = ctx.name(), stage = %fault.stage(), "fault swallowed by error hook");
            return;
        }
        if fault.stage() == Stage::After && ctx.output().has_error() {
            debug!(keyword = ctx.name(), "after-hook fault ignored, error already reported");
            return;
        }
        let message = fault.cause_message();
        let message = if message.trim().is_empty() {
            EMPTY_ERROR_MESSAGE.to_string()
        } else {
            message
        };
        ctx.output().set_error_with_dump(message, &fault.dump());
    }

    fn propagates(&self, keyword: &mut dyn Keyword, ctx: &KeywordContext, fault: &KeywordFault) -> bool {
        // The hook always sees the fault, even when the verdict is forced.
        let verdict = match catch_unwind(AssertUnwindSafe(|| keyword.on_error(ctx, fault))) {
            Ok(verdict) => verdict,
            Err(payload) => {
                error!(
                    keyword = ctx.name(),
                    panic = %panic_message(payload.as_ref()),
                    "error hook panicked"
                );
                true
            }
        };
        verdict || self.always_propagate || fault.is_panic()
    }
}

/// Extracts the text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
