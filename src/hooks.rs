//! Observability capabilities injected into a `JobManager`.
//!
//! Both traits are invoked from worker tasks on arbitrary threads, so
//! implementations must be `Send + Sync` and must not block for long.

use std::time::Duration;

use crate::error::ExecutionError;
use crate::job::context::ExecutionContext;

/// Called around every execution.
///
/// `start` runs before the action; the returned finisher is consumed exactly
/// once after the action concludes, whatever the outcome.
pub trait Tracer: Send + Sync {
  fn start(&self, ctx: &ExecutionContext) -> Box<dyn TraceFinisher>;
}

pub trait TraceFinisher: Send {
  /// `error` is `None` when the action returned `Ok(())` without being cancelled.
  fn finish(self: Box<Self>, ctx: &ExecutionContext, error: Option<&ExecutionError>);
}

/// Structured events emitted by the worker.
#[derive(Debug)]
pub enum ExecutionEvent<'a> {
  Started {
    ctx: &'a ExecutionContext,
  },
  Completed {
    ctx: &'a ExecutionContext,
    elapsed: Duration,
  },
  /// The token was cancelled (manually or by timeout) and the action did not
  /// report an error of its own.
  Cancelled {
    ctx: &'a ExecutionContext,
    elapsed: Duration,
    timed_out: bool,
  },
  /// Fired once per execution whose action returned an error or panicked.
  Failed {
    ctx: &'a ExecutionContext,
    elapsed: Duration,
    error: &'a ExecutionError,
  },
}

impl ExecutionEvent<'_> {
  pub fn context(&self) -> &ExecutionContext {
    match self {
      ExecutionEvent::Started { ctx }
      | ExecutionEvent::Completed { ctx, .. }
      | ExecutionEvent::Cancelled { ctx, .. }
      | ExecutionEvent::Failed { ctx, .. } => ctx,
    }
  }
}

pub trait Logger: Send + Sync {
  fn log(&self, event: &ExecutionEvent<'_>);
}
