//! # Routine Pipeline
//!
//! Ordered execution of reconcile routines sharing one context.
//!
//! Every routine must be idempotent: a requeued pipeline always restarts
//! from the first routine.

use crate::controller::lifecycle::RequeueHint;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// What the pipeline does after a routine
#[derive(Debug)]
pub enum RoutineResult {
    /// Run the next routine
    Continue,
    /// Stop and fail the pipeline with this error
    Break(anyhow::Error),
    /// Stop without error and without asking for a retry
    Exit,
    /// Stop without error and retry as soon as possible
    Requeue,
    /// Stop without error and retry after at least this long
    RequeueAfter(Duration),
}

impl From<anyhow::Error> for RoutineResult {
    fn from(error: anyhow::Error) -> Self {
        RoutineResult::Break(error)
    }
}

/// One step of a reconcile pipeline over context `C`
#[async_trait]
pub trait Routine<C: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut C) -> RoutineResult;
}

/// Run `routines` in order until one of them stops the pipeline
///
/// Returns `RequeueHint::None` when every routine continued or one exited.
pub async fn execute_reconcile_routine<C: Send>(
    ctx: &mut C,
    routines: &[&dyn Routine<C>],
) -> Result<RequeueHint, anyhow::Error> {
    for routine in routines {
        let result = routine.run(ctx).await;
        debug!(routine = routine.name(), result = ?result, "Routine finished");
        match result {
            RoutineResult::Continue => {}
            RoutineResult::Break(err) => return Err(err),
            RoutineResult::Exit => return Ok(RequeueHint::None),
            RoutineResult::Requeue => return Ok(RequeueHint::Immediate),
            RoutineResult::RequeueAfter(delay) => return Ok(RequeueHint::After(delay)),
        }
    }
    Ok(RequeueHint::None)
}
