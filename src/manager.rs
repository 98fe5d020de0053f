use crate::error::{BuildError, ExecutionError, ManagerError, ShutdownError};
use crate::heartbeat::Heartbeat;
use crate::hooks::{Logger, Tracer};
use crate::job::context::ExecutionContext;
use crate::job::{ExecutionStatus, Job, JobDetails, Task};
use crate::metrics::{ManagerMetrics, MetricsSnapshot};
use crate::registry::JobRegistry;
use crate::tracker::{Admission, CompletionHook, ExecutionTracker, Runnable};
use crate::worker::Worker;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, error, info, trace, warn};

/// Heartbeat interval used unless configured otherwise.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Heartbeat interval selected by [`ManagerBuilder::high_precision_heartbeat`].
pub const HIGH_PRECISION_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5);

/// Builder for configuring and creating a [`JobManager`].
///
/// # Example
///
/// ```no_run
/// use jobkeeper::JobManager;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = JobManager::builder()
///     .high_precision_heartbeat()
///     .build()?;
/// manager.start()?;
/// # Ok(())
/// # }
/// ```
pub struct ManagerBuilder {
  heartbeat_interval: Duration,
  tracer: Option<Arc<dyn Tracer>>,
  logger: Option<Arc<dyn Logger>>,
}

impl Default for ManagerBuilder {
  fn default() -> Self {
    Self {
      heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
      tracer: None,
      logger: None,
    }
  }
}

impl fmt::Debug for ManagerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagerBuilder")
      .field("heartbeat_interval", &self.heartbeat_interval)
      .field("tracer", &self.tracer.as_ref().map(|_| "<Tracer>"))
      .field("logger", &self.logger.as_ref().map(|_| "<Logger>"))
      .finish()
  }
}

impl ManagerBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets how often the heartbeat checks for due jobs. This bounds the
  /// worst-case delay between a job becoming due and it starting.
  pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
    self.heartbeat_interval = interval;
    self
  }

  /// Uses [`HIGH_PRECISION_HEARTBEAT_INTERVAL`], for tests and fast schedules.
  pub fn high_precision_heartbeat(self) -> Self {
    self.heartbeat_interval(HIGH_PRECISION_HEARTBEAT_INTERVAL)
  }

  /// Installs a tracer. It sees the start and the outcome of every execution.
  pub fn tracer<T: Tracer + 'static>(mut self, tracer: T) -> Self {
    self.tracer = Some(Arc::new(tracer));
    self
  }

  /// Installs a logger for execution lifecycle events.
  pub fn logger<L: Logger + 'static>(mut self, logger: L) -> Self {
    self.logger = Some(Arc::new(logger));
    self
  }

  /// Builds the manager. The heartbeat is not started.
  ///
  /// # Errors
  ///
  /// - [`BuildError::ZeroHeartbeatInterval`]: the interval is zero.
  /// - [`BuildError::NoRuntime`]: called outside a Tokio runtime.
  pub fn build(self) -> Result<JobManager, BuildError> {
    if self.heartbeat_interval.is_zero() {
      return Err(BuildError::ZeroHeartbeatInterval);
    }
    let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

    let metrics = ManagerMetrics::new();
    let worker = Worker::new(self.tracer, self.logger, metrics.clone());
    let inner = ManagerInner {
      registry: Arc::new(JobRegistry::new()),
      tracker: Arc::new(ExecutionTracker::new(runtime.clone(), worker)),
      heartbeat: Heartbeat::new(self.heartbeat_interval),
      metrics,
      runtime,
    };
    debug!(heartbeat_ms = self.heartbeat_interval.as_millis(), "JobManager built.");
    Ok(JobManager {
      inner: Arc::new(inner),
    })
  }
}

struct ManagerInner {
  registry: Arc<JobRegistry>,
  tracker: Arc<ExecutionTracker>,
  heartbeat: Heartbeat,
  metrics: ManagerMetrics,
  runtime: Handle,
}

impl ManagerInner {
  fn tick(&self, now: DateTime<Utc>) {
    self.metrics.heartbeat_ticks.fetch_add(1, AtomicOrdering::Relaxed);
    for job in self.registry.due_jobs(now) {
      // A panicking predicate or custom schedule skips only its own job.
      if catch_unwind(AssertUnwindSafe(|| self.tick_job(&job, now))).is_err() {
        error!(job_name = %job.name, "Job panicked while being scheduled.");
      }
    }
  }

  fn tick_job(&self, job: &Arc<Job>, now: DateTime<Utc>) {
    if !job.is_enabled() {
      trace!(job_name = %job.name, "Due job disabled by its enabled provider, skipping.");
      return;
    }
    let admission = self.dispatch_job(job);
    trace!(job_name = %job.name, ?admission, "Due job submitted.");
    // Advance even when rejected, so the same due instant is not re-fired.
    self
      .registry
      .set_next_run(job, job.schedule.next_run_time_at(Some(now), now));
  }

  fn dispatch_job(&self, job: &Arc<Job>) -> Admission {
    let registry = self.registry.clone();
    let registered = job.clone();
    let on_complete: CompletionHook = Box::new(
      move |ctx: &ExecutionContext, outcome: Option<&ExecutionError>| {
        let next_run = registered
          .schedule
          .next_run_time_at(Some(ctx.started_at), Utc::now());
        registry.record_completion(
          &registered,
          ctx.started_at,
          next_run,
          outcome.map(ToString::to_string),
        );
      },
    );
    self.tracker.submit(Runnable::from_job(job, on_complete))
  }

  fn is_disabled(&self, name: &str) -> Result<bool, ManagerError> {
    let (job, manually_disabled) = self.registry.lookup(name)?;
    Ok(manually_disabled || !job.is_enabled())
  }
}

/// The job manager: loads jobs, runs the heartbeat, and executes tasks and
/// jobs under their concurrency policy.
///
/// Cloning yields another handle to the same manager. The heartbeat stops once
/// the last handle is dropped; in-flight executions run to completion.
#[derive(Clone)]
pub struct JobManager {
  inner: Arc<ManagerInner>,
}

impl fmt::Debug for JobManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("JobManager")
      .field("heartbeat_interval", &self.inner.heartbeat.interval())
      .field("started", &self.inner.heartbeat.is_running())
      .field("jobs", &self.inner.registry.len())
      .field("in_flight", &self.inner.tracker.len())
      .finish()
  }
}

impl JobManager {
  pub fn builder() -> ManagerBuilder {
    ManagerBuilder::new()
  }

  /// Builds a manager with the default heartbeat and no hooks.
  ///
  /// # Errors
  ///
  /// [`BuildError::NoRuntime`] when called outside a Tokio runtime.
  pub fn new() -> Result<Self, BuildError> {
    ManagerBuilder::new().build()
  }

  /// The configured heartbeat period.
  pub fn heartbeat_interval(&self) -> Duration {
    self.inner.heartbeat.interval()
  }

  // --- Registry ---

  /// Registers a job. Its first due time is `schedule.next_run_time(None)`.
  ///
  /// # Errors
  ///
  /// [`ManagerError::DuplicateJob`] if a job with that name is already loaded.
  pub fn load_job(&self, job: Job) -> Result<(), ManagerError> {
    let next_run = job.schedule.next_run_time(None);
    let name = job.name.clone();
    self.inner.registry.insert(Arc::new(job), next_run)?;
    self.inner.metrics.jobs_loaded.fetch_add(1, AtomicOrdering::Relaxed);
    info!(job_name = %name, ?next_run, "Job loaded.");
    Ok(())
  }

  /// Loads several jobs, stopping at the first failure. Jobs loaded before the
  /// failure stay loaded.
  pub fn load_jobs<I>(&self, jobs: I) -> Result<(), ManagerError>
  where
    I: IntoIterator<Item = Job>,
  {
    jobs.into_iter().try_for_each(|job| self.load_job(job))
  }

  /// Removes a job. Executions already in flight are not affected.
  pub fn unload_job(&self, name: &str) -> Result<(), ManagerError> {
    self.inner.registry.remove(name)?;
    info!(job_name = %name, "Job unloaded.");
    Ok(())
  }

  /// Whether a job named `name` is loaded.
  pub fn has_job(&self, name: &str) -> bool {
    self.inner.registry.lookup(name).is_ok()
  }

  pub fn disable_job(&self, name: &str) -> Result<(), ManagerError> {
    self.inner.registry.set_manually_disabled(name, true)?;
    info!(job_name = %name, "Job disabled.");
    Ok(())
  }

  /// Clears the manual disabled flag. A job whose enabled provider reports
  /// `false` stays disabled.
  pub fn enable_job(&self, name: &str) -> Result<(), ManagerError> {
    self.inner.registry.set_manually_disabled(name, false)?;
    info!(job_name = %name, "Job enabled.");
    Ok(())
  }

  /// # Errors
  ///
  /// [`ManagerError::JobNotFound`] if no job with that name is loaded.
  pub fn is_disabled(&self, name: &str) -> Result<bool, ManagerError> {
    self.inner.is_disabled(name)
  }

  pub fn job_details(&self, name: &str) -> Result<JobDetails, ManagerError> {
    let (mut details, job) = self.inner.registry.with_record(name, |record| {
      let details = JobDetails {
        name: record.job.name.clone(),
        schedule: record.job.schedule.clone(),
        concurrency: record.job.concurrency,
        disabled: record.manually_disabled,
        running: false,
        last_run: record.last_run,
        next_run: record.next_run,
        last_error: record.last_error.clone(),
        run_count: record.run_count,
      };
      (details, record.job.clone())
    })?;
    details.disabled = details.disabled || !job.is_enabled();
    details.running = self.inner.tracker.is_running(name);
    Ok(details)
  }

  /// Details for every loaded job, sorted by name.
  pub fn list_jobs(&self) -> Vec<JobDetails> {
    self
      .inner
      .registry
      .names()
      .iter()
      .filter_map(|name| self.job_details(name).ok())
      .collect()
  }

  // --- Heartbeat ---

  /// Starts the heartbeat.
  ///
  /// # Errors
  ///
  /// [`ManagerError::AlreadyRunning`] if it is already started.
  pub fn start(&self) -> Result<(), ManagerError> {
    let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
    self.inner.heartbeat.start(&self.inner.runtime, move |now| {
      if let Some(inner) = weak.upgrade() {
        inner.tick(now);
      }
    })?;
    info!(
      interval_ms = self.inner.heartbeat.interval().as_millis(),
      "JobManager started."
    );
    Ok(())
  }

  /// Stops the heartbeat. Running executions are left to finish.
  ///
  /// # Errors
  ///
  /// [`ManagerError::NotRunning`] if it was not started.
  pub fn stop(&self) -> Result<(), ManagerError> {
    self.inner.heartbeat.stop()?;
    info!("JobManager stopped.");
    Ok(())
  }

  /// Whether the heartbeat is running.
  pub fn is_started(&self) -> bool {
    self.inner.heartbeat.is_running()
  }

  // --- Execution ---

  /// Runs a loaded job now, regardless of its schedule.
  ///
  /// # Errors
  ///
  /// [`ManagerError::JobNotFound`] if no job with that name is loaded.
  pub fn run_job(&self, name: &str) -> Result<Admission, ManagerError> {
    let (job, manually_disabled) = self.inner.registry.lookup(name)?;
    if manually_disabled || !job.is_enabled() {
      debug!(job_name = %name, "Job is disabled, not running.");
      return Ok(Admission::Disabled);
    }
    Ok(self.inner.dispatch_job(&job))
  }

  /// Submits an ad-hoc task. Returns once the task is admitted or rejected;
  /// the action runs asynchronously.
  pub fn run_task(&self, task: Task) -> Admission {
    self.inner.tracker.submit(Runnable::from(task))
  }

  /// Cancels every in-flight execution named `name`. Returns how many were
  /// signalled. Does not wait for them to stop.
  ///
  /// # Errors
  ///
  /// [`ManagerError::TaskNotFound`] if nothing by that name is running.
  pub fn cancel_task(&self, name: &str) -> Result<usize, ManagerError> {
    match self.inner.tracker.cancel(name) {
      0 => Err(ManagerError::TaskNotFound(name.to_string())),
      signalled => {
        info!(name, signalled, "Cancellation requested.");
        Ok(signalled)
      }
    }
  }

  /// Whether any task or job execution named `name` is in flight.
  /// Unrelated to [`JobManager::is_started`].
  pub fn is_running(&self, name: &str) -> bool {
    self.inner.tracker.is_running(name)
  }

  /// In-flight executions, oldest first.
  pub fn running_executions(&self) -> Vec<ExecutionStatus> {
    self.inner.tracker.snapshot()
  }

  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.inner.metrics.snapshot()
  }

  // --- Shutdown ---

  /// Stops the heartbeat and waits for in-flight executions to finish.
  ///
  /// # Errors
  ///
  /// [`ShutdownError::Timeout`] if `timeout` elapses first.
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful shutdown...");
    self.stop_for_shutdown();
    self.await_idle(timeout).await
  }

  /// Stops the heartbeat, cancels every in-flight execution and waits for
  /// them to return.
  ///
  /// # Errors
  ///
  /// [`ShutdownError::Timeout`] if `timeout` elapses first.
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced shutdown...");
    self.stop_for_shutdown();
    let cancelled = self.inner.tracker.cancel_all();
    debug!(cancelled, "Cancelled in-flight executions.");
    self.await_idle(timeout).await
  }

  fn stop_for_shutdown(&self) {
    if self.inner.heartbeat.stop().is_err() {
      trace!("Heartbeat was not running at shutdown.");
    }
  }

  async fn await_idle(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    let idle = self.inner.tracker.wait_idle();
    match timeout {
      Some(timeout) => tokio::time::timeout(timeout, idle).await.map_err(|_| {
        warn!(
          in_flight = self.inner.tracker.len(),
          "Shutdown timed out after {:?}", timeout
        );
        ShutdownError::Timeout
      }),
      None => {
        idle.await;
        Ok(())
      }
    }?;
    info!("All executions finished.");
    Ok(())
  }
}
