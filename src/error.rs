use std::time::Duration;

use thiserror::Error;

use crate::job::ActionError;

/// Errors that can occur while building a `JobManager` via `ManagerBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Heartbeat interval must be greater than zero")]
  ZeroHeartbeatInterval,
  #[error("JobManager must be built from within a Tokio runtime")]
  NoRuntime,
}

/// Errors returned synchronously by administrative `JobManager` operations
/// (registration, enable/disable, triggering, cancellation, start/stop).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
  #[error("Job '{0}' is already loaded.")]
  DuplicateJob(String),
  #[error("Job '{0}' not found.")]
  JobNotFound(String),
  #[error("No execution named '{0}' is currently running.")]
  TaskNotFound(String),
  #[error("Heartbeat is already running.")]
  AlreadyRunning,
  #[error("Heartbeat is not running.")]
  NotRunning,
}

/// Outcome of an execution that did not complete successfully.
///
/// Delivered to the tracer's finisher and, for `Failed` and `Panicked`, to the
/// logger as an `ExecutionEvent::Failed`. Never returned to the caller that
/// triggered the execution.
#[derive(Error, Debug)]
pub enum ExecutionError {
  /// The action returned an error.
  #[error("{0}")]
  Failed(ActionError),
  /// The action panicked; holds the panic message when one was recoverable.
  #[error("action panicked: {0}")]
  Panicked(String),
  /// The execution was cancelled via `cancel_task` or a forced shutdown.
  #[error("execution cancelled")]
  Cancelled,
  /// The execution's timeout elapsed.
  #[error("execution timed out after {0:?}")]
  TimedOut(Duration),
}

impl ExecutionError {
  /// Whether the outcome should be reported to the logger as a failure.
  pub fn is_failure(&self) -> bool {
    matches!(self, ExecutionError::Failed(_) | ExecutionError::Panicked(_))
  }
}

/// Errors related to `shutdown_graceful` / `shutdown_force`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Timed out waiting for in-flight executions to complete.")]
  Timeout,
}
