use crate::error::ExecutionError;
use crate::job::context::ExecutionContext;
use crate::job::{
  BoxedActionFn, Concurrency, ExecutionId, ExecutionKind, ExecutionOptions, ExecutionStatus, Job,
  Task,
};
use crate::worker::Worker;

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};
use uuid::Uuid;

/// Result of submitting a task or job for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  /// The execution was admitted and is running on its own worker task.
  Accepted(ExecutionId),
  /// A serial execution with the same name is still in flight; nothing ran.
  AlreadyRunning,
  /// The job is disabled; nothing ran.
  Disabled,
}

impl Admission {
  pub fn is_accepted(&self) -> bool {
    matches!(self, Admission::Accepted(_))
  }

  pub fn execution_id(&self) -> Option<ExecutionId> {
    match self {
      Admission::Accepted(id) => Some(*id),
      _ => None,
    }
  }
}

/// Called by the worker after the action concludes and before the record is released.
pub(crate) type CompletionHook = Box<dyn FnOnce(&ExecutionContext, Option<&ExecutionError>) + Send>;

/// Everything the tracker needs to run one execution.
pub(crate) struct Runnable {
  pub name: String,
  pub kind: ExecutionKind,
  pub concurrency: Concurrency,
  pub action: BoxedActionFn,
  pub options: ExecutionOptions,
  pub on_complete: Option<CompletionHook>,
}

impl From<Task> for Runnable {
  fn from(task: Task) -> Self {
    Self {
      name: task.name,
      kind: ExecutionKind::Task,
      concurrency: task.concurrency,
      action: task.action,
      options: task.options,
      on_complete: None,
    }
  }
}

impl Runnable {
  pub fn from_job(job: &Job, on_complete: CompletionHook) -> Self {
    Self {
      name: job.name.clone(),
      kind: ExecutionKind::Job,
      concurrency: job.concurrency,
      action: job.action.clone(),
      options: job.options.clone(),
      on_complete: Some(on_complete),
    }
  }
}

/// Bookkeeping entry for one in-flight execution.
#[derive(Debug, Clone)]
struct ExecutionRecord {
  ctx: ExecutionContext,
  concurrency: Concurrency,
  token: CancellationToken,
}

/// Releases the record when the worker finishes, or when its task is dropped
/// by a shutting-down runtime.
pub(crate) struct RecordGuard {
  tracker: Arc<ExecutionTracker>,
  name: String,
  execution_id: ExecutionId,
}

impl Drop for RecordGuard {
  fn drop(&mut self) {
    self.tracker.release(&self.name, self.execution_id);
  }
}

/// Tracks in-flight executions by name and enforces the concurrency policy.
pub(crate) struct ExecutionTracker {
  records: Mutex<HashMap<String, Vec<ExecutionRecord>>>,
  idle: Notify,
  runtime: Handle,
  worker: Worker,
}

impl ExecutionTracker {
  pub fn new(runtime: Handle, worker: Worker) -> Self {
    Self {
      records: Mutex::new(HashMap::new()),
      idle: Notify::new(),
      runtime,
      worker,
    }
  }

  /// Admits `unit` under the concurrency policy and spawns its worker.
  ///
  /// The serial check and the record insertion happen under one lock
  /// acquisition, so two concurrent serial submissions cannot both pass.
  pub fn submit(self: &Arc<Self>, unit: Runnable) -> Admission {
    let metrics = self.worker.metrics();
    let (ctx, token) = {
      let mut records = self.records.lock();
      let entries = records.entry(unit.name.clone()).or_default();
      if unit.concurrency == Concurrency::Serial && !entries.is_empty() {
        drop(records);
        metrics.executions_rejected.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(name = %unit.name, "Serial execution already in flight, rejecting.");
        return Admission::AlreadyRunning;
      }
      let ctx = ExecutionContext {
        execution_id: Uuid::new_v4(),
        name: unit.name.clone(),
        kind: unit.kind,
        started_at: Utc::now(),
      };
      let token = CancellationToken::new();
      entries.push(ExecutionRecord {
        ctx: ctx.clone(),
        concurrency: unit.concurrency,
        token: token.clone(),
      });
      (ctx, token)
    };

    metrics.executions_started.fetch_add(1, AtomicOrdering::Relaxed);
    metrics.executions_active.fetch_add(1, AtomicOrdering::Relaxed);

    let execution_id = ctx.execution_id;
    let guard = RecordGuard {
      tracker: Arc::clone(self),
      name: unit.name.clone(),
      execution_id,
    };
    let span = tracing::span!(
      tracing::Level::INFO,
      "execution",
      name = unit.name.as_str(),
      kind = ?unit.kind,
      %execution_id
    );
    let worker = self.worker.clone();
    self.runtime.spawn(
      async move {
        worker.execute(ctx, token, unit, guard).await;
      }
      .instrument(span),
    );

    Admission::Accepted(execution_id)
  }

  fn release(&self, name: &str, execution_id: ExecutionId) {
    let now_idle = {
      let mut records = self.records.lock();
      let Some(entries) = records.get_mut(name) else {
        return;
      };
      let before = entries.len();
      entries.retain(|record| record.ctx.execution_id != execution_id);
      if entries.len() == before {
        return;
      }
      if entries.is_empty() {
        records.remove(name);
      }
      records.is_empty()
    };
    self
      .worker
      .metrics()
      .executions_active
      .fetch_sub(1, AtomicOrdering::Relaxed);
    if now_idle {
      self.idle.notify_waiters();
    }
  }

  /// Signals every in-flight execution under `name`. Returns how many were signalled.
  pub fn cancel(&self, name: &str) -> usize {
    let tokens: Vec<CancellationToken> = self
      .records
      .lock()
      .get(name)
      .map(|entries| entries.iter().map(|record| record.token.clone()).collect())
      .unwrap_or_default();
    for token in &tokens {
      token.cancel();
    }
    tokens.len()
  }

  /// Signals every in-flight execution, whatever its name. Tokens are collected
  /// under the lock and cancelled after it is released.
  pub fn cancel_all(&self) -> usize {
    let tokens: Vec<CancellationToken> = self
      .records
      .lock()
      .values()
      .flatten()
      .map(|record| record.token.clone())
      .collect();
    for token in &tokens {
      token.cancel();
    }
    tokens.len()
  }

  /// Whether any execution under `name` still holds a record.
  pub fn is_running(&self, name: &str) -> bool {
    self.records.lock().contains_key(name)
  }

  /// Number of in-flight executions across all names.
  pub fn len(&self) -> usize {
    self.records.lock().values().map(Vec::len).sum()
  }

  /// Status of every in-flight execution, ordered by start time then name.
  pub fn snapshot(&self) -> Vec<ExecutionStatus> {
    let mut statuses: Vec<ExecutionStatus> = self
      .records
      .lock()
      .values()
      .flatten()
      .map(|record| ExecutionStatus {
        execution_id: record.ctx.execution_id,
        name: record.ctx.name.clone(),
        kind: record.ctx.kind,
        concurrency: record.concurrency,
        started_at: record.ctx.started_at,
      })
      .collect();
    statuses.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.name.cmp(&b.name)));
    statuses
  }

  /// Resolves once no execution is in flight.
  pub async fn wait_idle(&self) {
    loop {
      // Register before checking so a release in between is not missed.
      let notified = self.idle.notified();
      if self.len() == 0 {
        return;
      }
      notified.await;
    }
  }
}
