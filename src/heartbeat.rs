use crate::error::ManagerError;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

struct Running {
  stop: CancellationToken,
  task: JoinHandle<()>,
}

/// Periodic ticker driving schedule evaluation.
///
/// `Stopped -> Running -> Stopped`. The transition is guarded by a mutex, so
/// concurrent `start` calls cannot both spawn a loop.
pub(crate) struct Heartbeat {
  interval: Duration,
  state: Mutex<Option<Running>>,
}

impl Heartbeat {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval,
      state: Mutex::new(None),
    }
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  /// Spawns the loop, calling `on_tick` once per interval.
  ///
  /// # Errors
  ///
  /// [`ManagerError::AlreadyRunning`] if the loop is already active.
  pub fn start<F>(&self, runtime: &Handle, on_tick: F) -> Result<(), ManagerError>
  where
    F: Fn(DateTime<Utc>) + Send + 'static,
  {
    let mut state = self.state.lock();
    if state.as_ref().is_some_and(|running| !running.task.is_finished()) {
      return Err(ManagerError::AlreadyRunning);
    }

    let stop = CancellationToken::new();
    let task = runtime.spawn(run_loop(self.interval, stop.clone(), on_tick));
    *state = Some(Running { stop, task });
    Ok(())
  }

  /// Signals the loop to stop. Does not wait for a tick in progress.
  ///
  /// # Errors
  ///
  /// [`ManagerError::NotRunning`] if the loop was not started.
  pub fn stop(&self) -> Result<(), ManagerError> {
    match self.state.lock().take() {
      Some(running) if !running.task.is_finished() => {
        running.stop.cancel();
        Ok(())
      }
      _ => Err(ManagerError::NotRunning),
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .state
      .lock()
      .as_ref()
      .is_some_and(|running| !running.task.is_finished())
  }
}

impl Drop for Heartbeat {
  fn drop(&mut self) {
    if let Some(running) = self.state.get_mut().take() {
      running.stop.cancel();
    }
  }
}

async fn run_loop<F>(period: Duration, stop: CancellationToken, on_tick: F)
where
  F: Fn(DateTime<Utc>) + Send + 'static,
{
  let mut ticker = interval(period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
  info!(interval_ms = period.as_millis(), "Heartbeat started.");

  loop {
    tokio::select! {
      biased;

      _ = stop.cancelled() => {
        info!("Heartbeat stopped.");
        break;
      }
      _ = ticker.tick() => {
        let now = Utc::now();
        // A panicking schedule or predicate must not take the loop down.
        if catch_unwind(AssertUnwindSafe(|| on_tick(now))).is_err() {
          error!(%now, "Heartbeat tick panicked; continuing.");
        } else {
          trace!(%now, "Heartbeat tick processed.");
        }
      }
    }
  }
}
