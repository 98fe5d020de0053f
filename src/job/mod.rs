pub mod context;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::schedule::Schedule;

// --- Public Type Aliases ---

/// Unique identifier of a single execution (one run of a task or job).
pub type ExecutionId = Uuid;

/// Error type returned by actions. Anything convertible into a boxed error
/// works (`anyhow::Error`, `&str`, custom error types).
pub type ActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type ActionResult = Result<(), ActionError>;

/// The function type that tasks and jobs execute.
///
/// It receives the execution's cancellation token and must observe it to exit
/// early. Panics are caught by the worker and reported as failures.
pub type BoxedActionFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, ActionResult> + Send + Sync>;

/// Invoked once when an execution is cancelled or times out.
pub type CancellationCallback = Arc<dyn Fn() + Send + Sync>;

/// Reports whether a job is currently enabled.
pub type EnabledProvider = Arc<dyn Fn() -> bool + Send + Sync>;

fn box_action<F, Fut>(action: F) -> BoxedActionFn
where
  F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = ActionResult> + Send + 'static,
{
  Arc::new(move |token| Box::pin(action(token)) as BoxFuture<'static, ActionResult>)
}

/// Concurrency policy applied when an execution is admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Concurrency {
  /// Any number of executions under the same name may overlap.
  #[default]
  Parallel,
  /// At most one execution per name; further invocations are dropped.
  Serial,
}

/// Whether an execution came from an ad-hoc task or a loaded job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutionKind {
  Task,
  Job,
}

/// Optional per-execution policy shared by tasks and jobs.
#[derive(Clone, Default)]
pub struct ExecutionOptions {
  pub timeout: Option<StdDuration>,
  pub on_cancellation: Option<CancellationCallback>,
}

impl fmt::Debug for ExecutionOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExecutionOptions")
      .field("timeout", &self.timeout)
      .field("on_cancellation", &self.on_cancellation.as_ref().map(|_| "<Fn>"))
      .finish()
  }
}

// --- Task ---

/// An ad-hoc unit of work submitted through `JobManager::run_task`.
#[derive(Clone)]
pub struct Task {
  pub(crate) name: String,
  pub(crate) action: BoxedActionFn,
  pub(crate) options: ExecutionOptions,
  pub(crate) concurrency: Concurrency,
}

impl Task {
  /// Creates a parallel task with a generated unique name.
  pub fn new<F, Fut>(action: F) -> Self
  where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
  {
    Self::with_name(Uuid::new_v4().to_string(), action)
  }

  /// Creates a parallel task with the given name.
  pub fn with_name<F, Fut>(name: impl Into<String>, action: F) -> Self
  where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
  {
    Self {
      name: name.into(),
      action: box_action(action),
      options: ExecutionOptions::default(),
      concurrency: Concurrency::Parallel,
    }
  }

  /// Creates a serial task: a second run under the same name is rejected while
  /// the first is still in flight.
  pub fn serial<F, Fut>(name: impl Into<String>, action: F) -> Self
  where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
  {
    Self::with_name(name, action).with_concurrency(Concurrency::Serial)
  }

  pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
    self.concurrency = concurrency;
    self
  }

  /// Cancels the execution's token once `timeout` has elapsed.
  pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
    self.options.timeout = Some(timeout);
    self
  }

  pub fn on_cancellation<C>(mut self, callback: C) -> Self
  where
    C: Fn() + Send + Sync + 'static,
  {
    self.options.on_cancellation = Some(Arc::new(callback));
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn concurrency(&self) -> Concurrency {
    self.concurrency
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("name", &self.name)
      .field("action", &format_args!("<Fn>"))
      .field("options", &self.options)
      .field("concurrency", &self.concurrency)
      .finish()
  }
}

// --- Job ---

/// A named, schedulable unit of work loaded through `JobManager::load_job`.
///
/// Jobs are serial by default so that a slow run is never overlapped by the
/// next heartbeat-triggered one; call [`Job::parallel`] to opt out.
#[derive(Clone)]
pub struct Job {
  pub(crate) name: String,
  pub(crate) schedule: Schedule,
  pub(crate) action: BoxedActionFn,
  pub(crate) options: ExecutionOptions,
  pub(crate) concurrency: Concurrency,
  pub(crate) enabled: Option<EnabledProvider>,
}

impl Job {
  pub fn new<F, Fut>(name: impl Into<String>, schedule: Schedule, action: F) -> Self
  where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
  {
    Self {
      name: name.into(),
      schedule,
      action: box_action(action),
      options: ExecutionOptions::default(),
      concurrency: Concurrency::Serial,
      enabled: None,
    }
  }

  /// Lets runs of this job overlap: a tick finding it due starts a new run
  /// even while earlier ones are still in flight.
  pub fn parallel(mut self) -> Self {
    self.concurrency = Concurrency::Parallel;
    self
  }

  /// Restores the default: a trigger landing on an in-flight run is dropped
  /// and counted in `executions_rejected`.
  pub fn serial(mut self) -> Self {
    self.concurrency = Concurrency::Serial;
    self
  }

  /// Cancels each run's token once `timeout` has elapsed.
  pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
    self.options.timeout = Some(timeout);
    self
  }

  /// Called at most once per run, when it is cancelled or times out.
  pub fn on_cancellation<C>(mut self, callback: C) -> Self
  where
    C: Fn() + Send + Sync + 'static,
  {
    self.options.on_cancellation = Some(Arc::new(callback));
    self
  }

  /// Attaches a dynamic predicate. While it returns `false` the job counts as
  /// disabled, regardless of `JobManager::enable_job`.
  pub fn with_enabled_provider<P>(mut self, provider: P) -> Self
  where
    P: Fn() -> bool + Send + Sync + 'static,
  {
    self.enabled = Some(Arc::new(provider));
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn schedule(&self) -> &Schedule {
    &self.schedule
  }

  pub fn concurrency(&self) -> Concurrency {
    self.concurrency
  }

  /// Current value of the enabled predicate; `true` when none was declared.
  pub fn is_enabled(&self) -> bool {
    self.enabled.as_ref().map_or(true, |provider| provider())
  }
}

impl fmt::Debug for Job {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Job")
      .field("name", &self.name)
      .field("schedule", &self.schedule)
      .field("action", &format_args!("<Fn>"))
      .field("options", &self.options)
      .field("concurrency", &self.concurrency)
      .field("enabled", &self.enabled.as_ref().map(|_| "<Fn>"))
      .finish()
  }
}

// --- Public Snapshot Structs for Querying ---

/// Detailed information about a loaded job.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobDetails {
  pub name: String,
  pub schedule: Schedule,
  pub concurrency: Concurrency,
  /// Manual flag OR'd with the negated enabled predicate.
  pub disabled: bool,
  /// Whether at least one execution of this job is currently in flight.
  pub running: bool,
  /// Start time of the most recently completed execution.
  pub last_run: Option<DateTime<Utc>>,
  /// When the heartbeat will next consider this job due.
  pub next_run: Option<DateTime<Utc>>,
  /// Error message of the most recently completed execution, if it failed.
  pub last_error: Option<String>,
  /// Number of completed executions since the job was loaded.
  pub run_count: u64,
}

/// A point-in-time view of one in-flight execution.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionStatus {
  pub execution_id: ExecutionId,
  pub name: String,
  pub kind: ExecutionKind,
  pub concurrency: Concurrency,
  pub started_at: DateTime<Utc>,
}
