use crate::error::ExecutionError;
use crate::hooks::{ExecutionEvent, Logger, Tracer};
use crate::job::context::ExecutionContext;
use crate::job::{ActionResult, CancellationCallback};
use crate::metrics::ManagerMetrics;
use crate::tracker::{RecordGuard, Runnable};

#[cfg(feature = "execution_context")]
use crate::job::context::CURRENT_EXECUTION_CONTEXT;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why an execution's token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelCause {
  Cancelled,
  TimedOut(Duration),
}

/// Runs a single admitted execution: invokes the action on its own task,
/// enforces the timeout, fires the cancellation callback, and reports the
/// outcome to the tracer, the logger and the metrics.
#[derive(Clone)]
pub(crate) struct Worker {
  tracer: Option<Arc<dyn Tracer>>,
  logger: Option<Arc<dyn Logger>>,
  metrics: ManagerMetrics,
}

impl Worker {
  pub fn new(
    tracer: Option<Arc<dyn Tracer>>,
    logger: Option<Arc<dyn Logger>>,
    metrics: ManagerMetrics,
  ) -> Self {
    Self {
      tracer,
      logger,
      metrics,
    }
  }

  pub fn metrics(&self) -> &ManagerMetrics {
    &self.metrics
  }

  pub async fn execute(
    &self,
    ctx: ExecutionContext,
    token: CancellationToken,
    unit: Runnable,
    guard: RecordGuard,
  ) {
    let Runnable {
      action,
      options,
      on_complete,
      ..
    } = unit;

    debug!("Starting execution.");
    let finisher = self.tracer.as_ref().and_then(|tracer| {
      match catch_unwind(AssertUnwindSafe(|| tracer.start(&ctx))) {
        Ok(finisher) => Some(finisher),
        Err(_) => {
          warn!("Tracer panicked while starting an execution; continuing untraced.");
          None
        }
      }
    });
    self.emit(&ExecutionEvent::Started { ctx: &ctx });

    let started = Instant::now();
    let future = action(token.clone());
    #[cfg(feature = "execution_context")]
    let future = CURRENT_EXECUTION_CONTEXT.scope(ctx.clone(), future);
    let handle = tokio::spawn(future);

    let (joined, cause) = drive(handle, &token, options.timeout, options.on_cancellation).await;
    let elapsed = started.elapsed();
    self.metrics.execution_duration.record(elapsed);

    let outcome = self.classify(joined, cause);
    self.report(&ctx, elapsed, cause, outcome.as_ref());

    if let Some(finisher) = finisher {
      if catch_unwind(AssertUnwindSafe(|| finisher.finish(&ctx, outcome.as_ref()))).is_err() {
        warn!("Tracer panicked while finishing an execution.");
      }
    }
    if let Some(on_complete) = on_complete {
      on_complete(&ctx, outcome.as_ref());
    }
    drop(guard);
  }

  fn classify(
    &self,
    joined: Result<ActionResult, JoinError>,
    cause: Option<CancelCause>,
  ) -> Option<ExecutionError> {
    let outcome = match joined {
      Ok(Ok(())) => match cause {
        None => None,
        Some(CancelCause::Cancelled) => Some(ExecutionError::Cancelled),
        Some(CancelCause::TimedOut(timeout)) => Some(ExecutionError::TimedOut(timeout)),
      },
      Ok(Err(err)) => Some(ExecutionError::Failed(err)),
      Err(join_error) if join_error.is_panic() => {
        Some(ExecutionError::Panicked(panic_message(join_error.into_panic())))
      }
      // The action task was dropped, which only happens while the runtime shuts down.
      Err(_) => Some(ExecutionError::Cancelled),
    };
    let counter = match &outcome {
      None => &self.metrics.executions_succeeded,
      Some(ExecutionError::Failed(_)) => &self.metrics.executions_failed,
      Some(ExecutionError::Panicked(_)) => &self.metrics.executions_panicked,
      Some(ExecutionError::Cancelled) => &self.metrics.executions_cancelled,
      Some(ExecutionError::TimedOut(_)) => &self.metrics.executions_timed_out,
    };
    counter.fetch_add(1, AtomicOrdering::Relaxed);
    outcome
  }

  fn report(
    &self,
    ctx: &ExecutionContext,
    elapsed: Duration,
    cause: Option<CancelCause>,
    outcome: Option<&ExecutionError>,
  ) {
    let elapsed_ms = elapsed.as_millis();
    match outcome {
      None => {
        info!(elapsed_ms, "Execution completed.");
        self.emit(&ExecutionEvent::Completed { ctx, elapsed });
      }
      Some(error) if error.is_failure() => {
        error!(elapsed_ms, %error, "Execution failed.");
        self.emit(&ExecutionEvent::Failed {
          ctx,
          elapsed,
          error,
        });
      }
      Some(_) => {
        let timed_out = matches!(cause, Some(CancelCause::TimedOut(_)));
        info!(elapsed_ms, timed_out, "Execution cancelled.");
        self.emit(&ExecutionEvent::Cancelled {
          ctx,
          elapsed,
          timed_out,
        });
      }
    }
  }

  fn emit(&self, event: &ExecutionEvent<'_>) {
    if let Some(logger) = &self.logger {
      if catch_unwind(AssertUnwindSafe(|| logger.log(event))).is_err() {
        warn!("Logger panicked while handling an execution event.");
      }
    }
  }
}

/// Waits for the action task while watching the token and the timeout.
///
/// Cancellation is cooperative: once the token fires the action is left to
/// observe it and return. An action that never awaits the token runs past its
/// timeout and keeps its record until it returns.
async fn drive(
  mut handle: tokio::task::JoinHandle<ActionResult>,
  token: &CancellationToken,
  timeout: Option<Duration>,
  on_cancellation: Option<CancellationCallback>,
) -> (Result<ActionResult, JoinError>, Option<CancelCause>) {
  let deadline = async {
    match timeout {
      Some(timeout) => tokio::time::sleep(timeout).await,
      None => std::future::pending::<()>().await,
    }
  };
  tokio::pin!(deadline);

  let mut cause = None;
  let joined = loop {
    tokio::select! {
      biased;

      joined = &mut handle => break joined,

      _ = token.cancelled(), if cause.is_none() => {
        cause = Some(CancelCause::Cancelled);
        debug!("Execution cancelled, waiting for the action to return.");
        fire_callback(on_cancellation.as_ref());
      }

      _ = &mut deadline, if cause.is_none() => {
        let timeout = timeout.unwrap_or_default();
        cause = Some(CancelCause::TimedOut(timeout));
        warn!(timeout_ms = timeout.as_millis(), "Execution timed out, cancelling.");
        token.cancel();
        fire_callback(on_cancellation.as_ref());
      }
    }
  };
  // The action may observe the token and return before the select above does.
  if cause.is_none() && token.is_cancelled() {
    cause = Some(CancelCause::Cancelled);
    fire_callback(on_cancellation.as_ref());
  }
  (joined, cause)
}

fn fire_callback(callback: Option<&CancellationCallback>) {
  if let Some(callback) = callback {
    if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
      warn!("Cancellation callback panicked.");
    }
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  }
}
