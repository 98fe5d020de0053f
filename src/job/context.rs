use chrono::{DateTime, Utc};

use super::{ExecutionId, ExecutionKind};

/// Identity of a running execution.
///
/// Handed to the tracer and logger, and, with the `execution_context` feature,
/// readable from inside an action via `try_get_current_execution_context()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
  /// Unique ID of this specific execution.
  pub execution_id: ExecutionId,
  /// Task or job name.
  pub name: String,
  pub kind: ExecutionKind,
  pub started_at: DateTime<Utc>,
}

#[cfg(feature = "execution_context")]
tokio::task_local! {
    /// Set by the worker for the duration of an action.
    pub static CURRENT_EXECUTION_CONTEXT: ExecutionContext;
}

/// Attempts to retrieve the `ExecutionContext` of the running action.
///
/// Returns `None` when called outside an action started by a `JobManager`.
#[cfg(feature = "execution_context")]
pub fn try_get_current_execution_context() -> Option<ExecutionContext> {
  CURRENT_EXECUTION_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Retrieves the current `ExecutionContext`, panicking outside an action.
#[cfg(feature = "execution_context")]
#[macro_export]
macro_rules! execution_context {
  () => {
    $crate::job::context::CURRENT_EXECUTION_CONTEXT.with(|ctx| ctx.clone())
  };
}
