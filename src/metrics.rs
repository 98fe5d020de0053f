use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Adds one sample. Durations past `usize::MAX` microseconds saturate.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Number of samples recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Sum of all samples, in microseconds.
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Atomic counters shared by the manager, the heartbeat and every worker.
/// Cloning only clones the `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct ManagerMetrics {
  // --- Counters ---
  /// Successful `load_job` calls.
  pub jobs_loaded: Arc<AtomicUsize>,
  /// Heartbeat ticks processed, including ticks with nothing due.
  pub heartbeat_ticks: Arc<AtomicUsize>,
  /// Executions admitted by the tracker.
  pub executions_started: Arc<AtomicUsize>,
  /// Actions that returned `Ok(())` without being cancelled.
  pub executions_succeeded: Arc<AtomicUsize>,
  /// Actions that returned an error.
  pub executions_failed: Arc<AtomicUsize>,
  pub executions_panicked: Arc<AtomicUsize>,
  /// Executions whose token was cancelled by a caller or by shutdown.
  pub executions_cancelled: Arc<AtomicUsize>,
  /// Executions cancelled by their own timeout. Not counted as cancelled.
  pub executions_timed_out: Arc<AtomicUsize>,
  /// Serial invocations dropped because one was already in flight.
  pub executions_rejected: Arc<AtomicUsize>,

  // --- Gauges ---
  /// Executions currently in flight.
  pub executions_active: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Wall-clock time from action start to its outcome.
  pub execution_duration: Arc<SimpleHistogram>,
}

impl ManagerMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reads every counter. Counters are loaded independently, so the result
  /// is not an atomic view across fields.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_loaded: self.jobs_loaded.load(order),
      heartbeat_ticks: self.heartbeat_ticks.load(order),
      executions_started: self.executions_started.load(order),
      executions_succeeded: self.executions_succeeded.load(order),
      executions_failed: self.executions_failed.load(order),
      executions_panicked: self.executions_panicked.load(order),
      executions_cancelled: self.executions_cancelled.load(order),
      executions_timed_out: self.executions_timed_out.load(order),
      executions_rejected: self.executions_rejected.load(order),
      executions_active: self.executions_active.load(order),
      execution_duration_count: self.execution_duration.get_count(),
      execution_duration_sum_micros: self.execution_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the manager's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  // Counters
  pub jobs_loaded: usize,
  pub heartbeat_ticks: usize,
  pub executions_started: usize,
  pub executions_succeeded: usize,
  pub executions_failed: usize,
  pub executions_panicked: usize,
  pub executions_cancelled: usize,
  pub executions_timed_out: usize,
  pub executions_rejected: usize,
  // Gauges
  pub executions_active: usize,
  // Histogram Data
  pub execution_duration_count: usize,
  pub execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean execution duration, or `None` if nothing has completed yet.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    if self.execution_duration_count == 0 {
      None
    } else {
      let mean = self.execution_duration_sum_micros as f64 / self.execution_duration_count as f64;
      Some(Duration::from_micros(mean as u64))
    }
  }
}
